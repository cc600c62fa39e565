pub mod assistant;
pub mod cli;
pub mod configuration;
pub mod error;
pub mod server;

pub use assistant::engine::{ResearchTask, Researcher, ResearcherFactory};
pub use assistant::fetcher::ReportFetcher;
pub use assistant::request::{ReportType, ResearchPayload, ResearchRequest};
pub use assistant::state::{ReportChunk, ReportResult, FALLBACK_REPORT};
pub use configuration::Configuration;
pub use error::RelayError;

use dotenv::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init() {
    dotenv().ok();
}

/// Installs the global tracing subscriber. Logs go to stderr so stdout carries only report output.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "research_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

use clap::Parser;
use research_relay::{cli, init, init_tracing};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize environment variables from .env
    init();
    init_tracing();

    match cli::run(cli::Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "research-relay failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

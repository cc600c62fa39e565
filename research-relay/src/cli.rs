use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::assistant::{
    fetcher::ReportFetcher,
    remote::RemoteResearcherFactory,
    request::{now_eastern, ReportType, ResearchPayload, ResearchRequest},
};
use crate::configuration::Configuration;
use crate::error::RelayError;
use crate::server::run_server;

#[derive(Parser, Debug)]
#[command(name = "research-relay")]
#[command(version)]
#[command(about = "Date-scoped research reports, streamed to the terminal or served over HTTP", long_about = None)]
pub struct Cli {
    /// Research query. Starts the HTTP server when omitted
    pub query: Option<String>,

    /// Type of report to write
    #[arg(long = "report_type")]
    pub report_type: Option<String>,

    /// Start of the publication window (ISO-8601). Times without an offset are read as UTC, not Eastern wall-clock time
    #[arg(long = "start_date")]
    pub start_date: Option<String>,

    /// End of the publication window (ISO-8601). Times without an offset are read as UTC, not Eastern wall-clock time
    #[arg(long = "end_date")]
    pub end_date: Option<String>,

    /// Preferred source URLs or domains
    #[arg(long, num_args = 1..)]
    pub sources: Vec<String>,

    /// Host to run the server on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to run the server on
    #[arg(long)]
    pub port: Option<u16>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Configuration) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }

    fn payload(&self, query: String) -> Result<ResearchPayload, RelayError> {
        Ok(ResearchPayload {
            query,
            report_type: self.report_type.as_deref().map(str::parse::<ReportType>).transpose()?,
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            sources: Some(self.sources.clone()),
        })
    }
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Configuration::from_env()?;
    cli.apply_overrides(&mut config);

    let fetcher = ReportFetcher::new(Arc::new(RemoteResearcherFactory::new(config.engine.clone())));

    match cli.query.clone() {
        Some(query) => run_terminal(&cli, query, &config, &fetcher).await,
        None => {
            run_server(config, fetcher).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_terminal(
    cli: &Cli,
    query: String,
    config: &Configuration,
    fetcher: &ReportFetcher,
) -> Result<ExitCode> {
    let request = match cli
        .payload(query)
        .and_then(|payload| ResearchRequest::from_payload(payload, config.date_validation, now_eastern()))
    {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(1));
        }
    };

    let mut stdout = tokio::io::stdout();
    let mut chunks = Box::pin(fetcher.stream(request));
    while let Some(chunk) = chunks.next().await {
        stdout.write_all(chunk.to_string().as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(ExitCode::SUCCESS)
}

use anyhow::Result;
use async_trait::async_trait;

use super::request::ReportType;

/// Everything the research engine is constructed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchTask {
    /// The user's query with the date context already prefixed.
    pub query: String,
    pub report_type: ReportType,
    pub sources: Vec<String>,
}

/// One research session against the external engine.
///
/// `conduct_research` gathers material and `write_report` turns whatever was
/// gathered into report text. Implementations must tolerate `write_report`
/// being called after a failed `conduct_research`.
#[async_trait]
pub trait Researcher: Send {
    async fn conduct_research(&mut self) -> Result<()>;

    async fn write_report(&mut self) -> Result<String>;
}

/// Builds a fresh [`Researcher`] for every request.
pub trait ResearcherFactory: Send + Sync {
    fn build(&self, task: ResearchTask) -> Box<dyn Researcher>;
}

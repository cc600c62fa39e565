use chrono::{DateTime, SecondsFormat};
use chrono_tz::Tz;
use enum_as_inner::EnumAsInner;
use serde::{Serialize, Serializer};
use std::fmt;

/// Report text used whenever the engine could not produce one.
pub const FALLBACK_REPORT: &str =
    "An error occurred while generating the report. Please try again later.";

/// One unit of a streamed research response.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum ReportChunk {
    Status(String),
    Error(String),
    Report(String),
    Timing(f64),
}

impl ReportChunk {
    pub fn status(message: impl Into<String>) -> Self {
        ReportChunk::Status(message.into())
    }
}

impl fmt::Display for ReportChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportChunk::Status(message) => writeln!(f, "{}", message),
            ReportChunk::Error(message) => writeln!(f, "{}", message),
            ReportChunk::Report(report) => writeln!(f, "\nReport:\n{}\n", report),
            ReportChunk::Timing(seconds) => writeln!(f, "Execution time: {:.2} seconds", seconds),
        }
    }
}

/// Result of a batched (non-streaming) research run.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResult {
    pub report: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub start_date: DateTime<Tz>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub end_date: DateTime<Tz>,
    pub execution_time: f64,
}

fn serialize_timestamp<S>(value: &DateTime<Tz>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, false))
}

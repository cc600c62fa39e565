use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::{America::New_York, Tz};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::configuration::DateValidation;
use crate::error::{RelayError, Result};

/// Oldest date accepted under strict validation, counted back from now.
pub const MAX_LOOKBACK_DAYS: i64 = 365 * 10;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Current time in US Eastern, the zone every request timestamp is normalized to.
pub fn now_eastern() -> DateTime<Tz> {
    Utc::now().with_timezone(&New_York)
}

/// Parses an ISO-8601 timestamp and converts it to US Eastern.
///
/// Trailing `Z` markers are stripped and values without an offset are read
/// as UTC. Values with an explicit offset keep it.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Tz>> {
    let trimmed = value.trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(with_offset.with_timezone(&New_York));
    }

    let stripped = trimmed.trim_end_matches(['Z', 'z']);
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(stripped, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(stripped, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        });

    match naive {
        Some(naive) => {
            let utc_time = Utc.from_utc_datetime(&naive);
            let et_time = utc_time.with_timezone(&New_York);
            tracing::debug!(%utc_time, %et_time, "Parsed request timestamp");
            Ok(et_time)
        }
        None => {
            tracing::debug!(value, "Date parsing error");
            Err(RelayError::invalid("Invalid date format"))
        }
    }
}

/// Report kinds understood by the research engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    #[default]
    ResearchReport,
    ResourceReport,
    OutlineReport,
    CustomReport,
    DetailedReport,
    SubtopicReport,
}

impl ReportType {
    pub const ALL: [ReportType; 6] = [
        ReportType::ResearchReport,
        ReportType::ResourceReport,
        ReportType::OutlineReport,
        ReportType::CustomReport,
        ReportType::DetailedReport,
        ReportType::SubtopicReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::ResearchReport => "research_report",
            ReportType::ResourceReport => "resource_report",
            ReportType::OutlineReport => "outline_report",
            ReportType::CustomReport => "custom_report",
            ReportType::DetailedReport => "detailed_report",
            ReportType::SubtopicReport => "subtopic_report",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        ReportType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| RelayError::invalid(format!("Unknown report type '{}'", value)))
    }
}

/// A research request as it arrives, before any normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResearchPayload {
    pub query: String,
    #[serde(default)]
    pub report_type: Option<ReportType>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

impl ResearchPayload {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResearchRequest {
    pub query: String,
    pub report_type: ReportType,
    pub start_date: Option<DateTime<Tz>>,
    pub end_date: Option<DateTime<Tz>>,
    pub sources: Vec<String>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            report_type: ReportType::default(),
            start_date: None,
            end_date: None,
            sources: Vec::new(),
        }
    }

    /// Normalizes a raw payload, applying `policy` against the reference time `now`.
    pub fn from_payload(
        payload: ResearchPayload,
        policy: DateValidation,
        now: DateTime<Tz>,
    ) -> Result<Self> {
        let query = payload.query.trim().to_string();
        if query.is_empty() {
            return Err(RelayError::invalid("Query must not be empty"));
        }

        let start_date = payload.start_date.as_deref().map(parse_timestamp).transpose()?;
        let end_date = payload.end_date.as_deref().map(parse_timestamp).transpose()?;

        let sources: Vec<String> = payload
            .sources
            .unwrap_or_default()
            .into_iter()
            .map(|source| source.trim().to_string())
            .filter(|source| !source.is_empty())
            .collect();

        if policy == DateValidation::Strict {
            for date in start_date.iter().chain(end_date.iter()) {
                check_date_in_range(date, &now)?;
            }
            for source in &sources {
                check_source_url(source)?;
            }
        }

        Ok(Self {
            query,
            report_type: payload.report_type.unwrap_or_default(),
            start_date,
            end_date,
            sources,
        })
    }
}

fn check_date_in_range(date: &DateTime<Tz>, now: &DateTime<Tz>) -> Result<()> {
    if date > now {
        return Err(RelayError::invalid("Date must be in the past or present"));
    }
    let earliest_allowed = *now - Duration::days(MAX_LOOKBACK_DAYS);
    if *date < earliest_allowed {
        return Err(RelayError::invalid(
            "Date must not be more than 10 years in the past",
        ));
    }
    Ok(())
}

fn check_source_url(source: &str) -> Result<()> {
    match Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(()),
        _ => Err(RelayError::invalid(format!("Invalid source URL: {}", source))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn eastern(rfc3339: &str) -> DateTime<Tz> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&New_York)
    }

    #[test]
    fn parses_utc_timestamp_into_eastern() {
        let parsed = parse_timestamp("2024-01-01T12:00:00Z").unwrap();
        assert_eq!(parsed.timezone(), New_York);
        assert_eq!(parsed.hour(), 7);
        assert_eq!(parsed.with_timezone(&Utc).hour(), 12);
    }

    #[test]
    fn naive_timestamp_is_read_as_utc() {
        let naive = parse_timestamp("2024-07-04T16:30:00").unwrap();
        let zulu = parse_timestamp("2024-07-04T16:30:00Z").unwrap();
        assert_eq!(naive, zulu);
        assert_eq!(naive.hour(), 12);
    }

    #[test]
    fn accepts_date_only_and_fractional_forms() {
        let date_only = parse_timestamp("2024-03-31").unwrap();
        assert_eq!(date_only.with_timezone(&Utc).to_rfc3339(), "2024-03-31T00:00:00+00:00");
        assert!(parse_timestamp("2024-03-31 08:15:00.250").is_ok());
        assert!(parse_timestamp("2024-03-31T08:15").is_ok());
    }

    #[test]
    fn explicit_offset_is_honoured() {
        let parsed = parse_timestamp("2024-01-01T05:00:00+05:00").unwrap();
        assert_eq!(parsed.with_timezone(&Utc).hour(), 0);
    }

    #[test]
    fn reserialization_is_stable() {
        let first = parse_timestamp("2024-02-29T23:59:59Z").unwrap();
        let second = parse_timestamp(&first.to_rfc3339()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_rfc3339(), second.to_rfc3339());
    }

    #[test]
    fn rejects_malformed_timestamps() {
        for bad in ["", "yesterday", "2024-13-01", "01/02/2024"] {
            let err = parse_timestamp(bad).unwrap_err();
            assert!(matches!(err, RelayError::InvalidInput(ref m) if m == "Invalid date format"));
        }
    }

    #[test]
    fn payload_defaults_are_filled_in() {
        let now = eastern("2024-06-01T00:00:00Z");
        let request =
            ResearchRequest::from_payload(ResearchPayload::new("  fusion power  "), DateValidation::Lenient, now)
                .unwrap();
        assert_eq!(request.query, "fusion power");
        assert_eq!(request.report_type, ReportType::ResearchReport);
        assert_eq!(request.start_date, None);
        assert!(request.sources.is_empty());
    }

    #[test]
    fn empty_query_is_rejected() {
        let now = now_eastern();
        let err = ResearchRequest::from_payload(ResearchPayload::new("   "), DateValidation::Lenient, now)
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
    }

    #[test]
    fn lenient_policy_accepts_future_and_ancient_dates() {
        let now = eastern("2024-06-01T00:00:00Z");
        let payload = ResearchPayload {
            start_date: Some("1990-01-01T00:00:00Z".into()),
            end_date: Some("2030-01-01T00:00:00Z".into()),
            sources: Some(vec!["not a url".into()]),
            ..ResearchPayload::new("history of the web")
        };
        assert!(ResearchRequest::from_payload(payload, DateValidation::Lenient, now).is_ok());
    }

    #[test]
    fn strict_policy_rejects_future_dates() {
        let now = eastern("2024-06-01T00:00:00Z");
        let payload = ResearchPayload {
            end_date: Some("2024-06-02T00:00:00Z".into()),
            ..ResearchPayload::new("q")
        };
        let err = ResearchRequest::from_payload(payload, DateValidation::Strict, now).unwrap_err();
        assert_eq!(err.detail(), "Date must be in the past or present");
    }

    #[test]
    fn strict_policy_rejects_dates_older_than_ten_years() {
        let now = eastern("2024-06-01T00:00:00Z");
        let payload = ResearchPayload {
            start_date: Some("2014-05-01T00:00:00Z".into()),
            ..ResearchPayload::new("q")
        };
        let err = ResearchRequest::from_payload(payload, DateValidation::Strict, now).unwrap_err();
        assert_eq!(err.detail(), "Date must not be more than 10 years in the past");
    }

    #[test]
    fn strict_policy_checks_source_urls() {
        let now = eastern("2024-06-01T00:00:00Z");
        let good = ResearchPayload {
            sources: Some(vec!["https://www.reuters.com/technology".into()]),
            ..ResearchPayload::new("q")
        };
        assert!(ResearchRequest::from_payload(good, DateValidation::Strict, now).is_ok());

        let bad = ResearchPayload {
            sources: Some(vec!["ftp://files.example".into()]),
            ..ResearchPayload::new("q")
        };
        assert!(ResearchRequest::from_payload(bad, DateValidation::Strict, now).is_err());
    }

    #[test]
    fn report_type_parses_known_names_only() {
        assert_eq!("outline_report".parse::<ReportType>().unwrap(), ReportType::OutlineReport);
        assert!("poem".parse::<ReportType>().is_err());
        let decoded: ReportType = serde_json::from_str("\"detailed_report\"").unwrap();
        assert_eq!(decoded, ReportType::DetailedReport);
    }
}

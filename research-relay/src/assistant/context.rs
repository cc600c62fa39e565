//! Date-window framing for research queries.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A resolved publication window. `start` never comes after `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    start_defaulted: bool,
    end_defaulted: bool,
}

impl DateWindow {
    /// Fills missing bounds with `now` and orders the pair.
    pub fn resolve(start: Option<DateTime<Tz>>, end: Option<DateTime<Tz>>, now: DateTime<Tz>) -> Self {
        let first = (start.unwrap_or(now), start.is_none());
        let second = (end.unwrap_or(now), end.is_none());
        let (first, second) = if first.0 > second.0 { (second, first) } else { (first, second) };
        Self {
            start: first.0,
            end: second.0,
            start_defaulted: first.1,
            end_defaulted: second.1,
        }
    }

    /// Calendar date of the start bound.
    pub fn start_label(&self) -> String {
        label(self.start, self.start_defaulted)
    }

    pub fn end_label(&self) -> String {
        label(self.end, self.end_defaulted)
    }
}

/// Client-supplied bounds read on the UTC clock they were sent on;
/// a bound filled from the service clock reads as the local day there.
fn label(instant: DateTime<Tz>, defaulted: bool) -> String {
    if defaulted {
        instant.format(DATE_FORMAT).to_string()
    } else {
        instant.with_timezone(&Utc).format(DATE_FORMAT).to_string()
    }
}

/// Prefixes `query` with the instruction that pins research to `window`.
pub fn contextualize_query(query: &str, window: &DateWindow) -> String {
    let (start, end) = (window.start_label(), window.end_label());
    format!(
        "IMPORTANT: Only use information from articles and content published from {start} to {end} (inclusive). \
         Disregard any information outside this date range, including later updates to older articles and content \
         that is not relevant to the query, even if it seems useful. If an article's publication date is not clear, \
         do not use it.\n\n\
         Query: {query}\n\n\
         When conducting research and writing the report, continuously verify and mention the publication dates of \
         your sources. Include only information from sources within the specified date range."
    )
}

/// Trailer appended to a finished report.
pub fn date_range_note(window: &DateWindow) -> String {
    format!(
        "\n\nNote: This report only contains information from sources published from {} to {}.",
        window.start_label(),
        window.end_label()
    )
}

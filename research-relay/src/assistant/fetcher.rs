use async_stream::stream;
use chrono::DateTime;
use chrono_tz::Tz;
use futures::{FutureExt, Stream, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use super::context::{contextualize_query, date_range_note, DateWindow};
use super::engine::{ResearchTask, ResearcherFactory};
use super::request::{now_eastern, ResearchRequest};
use super::state::{ReportChunk, ReportResult, FALLBACK_REPORT};
use crate::error::{panic_message, RelayError, ResearchStep};

/// Drives one research run against the engine and relays what it produces.
///
/// A failed research step does not stop the run: the report is still
/// requested from whatever the engine gathered, and a failed report falls
/// back to [`FALLBACK_REPORT`]. A panicking engine call counts as a failed step.
#[derive(Clone)]
pub struct ReportFetcher {
    factory: Arc<dyn ResearcherFactory>,
}

impl ReportFetcher {
    pub fn new(factory: Arc<dyn ResearcherFactory>) -> Self {
        Self { factory }
    }

    /// Runs to completion and returns the collected result.
    pub async fn fetch(&self, request: &ResearchRequest) -> ReportResult {
        self.fetch_at(request, now_eastern()).await
    }

    pub async fn fetch_at(&self, request: &ResearchRequest, now: DateTime<Tz>) -> ReportResult {
        let (window, chunks) = self.start(request.clone(), now);
        let mut chunks = std::pin::pin!(chunks);

        let mut report = None;
        let mut execution_time = 0.0;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                ReportChunk::Report(text) => report = Some(text),
                ReportChunk::Timing(seconds) => execution_time = seconds,
                ReportChunk::Status(_) | ReportChunk::Error(_) => {}
            }
        }

        ReportResult {
            report: report.unwrap_or_else(|| FALLBACK_REPORT.to_string()),
            start_date: window.start,
            end_date: window.end,
            execution_time,
        }
    }

    /// Lazily runs the research as the returned stream is polled.
    /// Dropping the stream cancels any in-flight engine call.
    pub fn stream(&self, request: ResearchRequest) -> impl Stream<Item = ReportChunk> + Send + 'static {
        self.stream_at(request, now_eastern())
    }

    pub fn stream_at(
        &self,
        request: ResearchRequest,
        now: DateTime<Tz>,
    ) -> impl Stream<Item = ReportChunk> + Send + 'static {
        self.start(request, now).1
    }

    fn start(
        &self,
        request: ResearchRequest,
        now: DateTime<Tz>,
    ) -> (DateWindow, impl Stream<Item = ReportChunk> + Send + 'static) {
        let window = DateWindow::resolve(request.start_date, request.end_date, now);
        let task = ResearchTask {
            query: contextualize_query(&request.query, &window),
            report_type: request.report_type,
            sources: request.sources,
        };
        tracing::info!(
            report_type = %task.report_type,
            from = %window.start_label(),
            to = %window.end_label(),
            sources = task.sources.len(),
            "Starting research"
        );
        let mut researcher = self.factory.build(task);

        let chunks = stream! {
            let started = Instant::now();

            yield ReportChunk::status("Starting research...");
            match unwound(AssertUnwindSafe(researcher.conduct_research()).catch_unwind().await) {
                Ok(()) => {
                    yield ReportChunk::status("Research completed.");
                }
                Err(source) => {
                    yield ReportChunk::Error(describe_failure(ResearchStep::Research, source));
                }
            }

            yield ReportChunk::status("Writing report...");
            match unwound(AssertUnwindSafe(researcher.write_report()).catch_unwind().await) {
                Ok(report) => {
                    yield ReportChunk::Report(format!("{}{}", report, date_range_note(&window)));
                }
                Err(source) => {
                    yield ReportChunk::Error(describe_failure(ResearchStep::Report, source));
                    yield ReportChunk::Report(FALLBACK_REPORT.to_string());
                }
            }

            let execution_time = started.elapsed().as_secs_f64();
            tracing::info!(execution_time, "Research finished");
            yield ReportChunk::Timing(execution_time);
        };

        (window, chunks)
    }
}

/// Folds a caught panic into the engine call's own error.
fn unwound<T>(outcome: std::thread::Result<anyhow::Result<T>>) -> anyhow::Result<T> {
    outcome.unwrap_or_else(|payload| Err(anyhow::anyhow!("engine panicked: {}", panic_message(&*payload))))
}

/// Logs an engine failure and renders it, cause chain included, for the client.
fn describe_failure(step: ResearchStep, source: anyhow::Error) -> String {
    let error = anyhow::Error::from(RelayError::Upstream { step, source });
    tracing::error!(%step, error = ?error, "Research engine call failed");
    format!("{:?}", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::engine::Researcher;
    use crate::assistant::request::parse_timestamp;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy, Default)]
    struct Failures {
        research: bool,
        report: bool,
    }

    struct StubResearcher {
        failures: Failures,
        researched: bool,
    }

    #[async_trait]
    impl Researcher for StubResearcher {
        async fn conduct_research(&mut self) -> anyhow::Result<()> {
            if self.failures.research {
                return Err(anyhow!("search backend unreachable"));
            }
            self.researched = true;
            Ok(())
        }

        async fn write_report(&mut self) -> anyhow::Result<String> {
            if self.failures.report {
                return Err(anyhow!("writer quota exhausted"));
            }
            if self.researched {
                Ok("full report".to_string())
            } else {
                Ok("partial report".to_string())
            }
        }
    }

    #[derive(Default)]
    struct StubFactory {
        failures: Failures,
        tasks: Mutex<Vec<ResearchTask>>,
    }

    impl ResearcherFactory for StubFactory {
        fn build(&self, task: ResearchTask) -> Box<dyn Researcher> {
            self.tasks.lock().unwrap().push(task);
            Box::new(StubResearcher {
                failures: self.failures,
                researched: false,
            })
        }
    }

    fn fetcher_with(failures: Failures) -> (ReportFetcher, Arc<StubFactory>) {
        let factory = Arc::new(StubFactory {
            failures,
            ..StubFactory::default()
        });
        (ReportFetcher::new(factory.clone()), factory)
    }

    fn dated_request(start: &str, end: &str) -> ResearchRequest {
        ResearchRequest {
            start_date: Some(parse_timestamp(start).unwrap()),
            end_date: Some(parse_timestamp(end).unwrap()),
            ..ResearchRequest::new("state of AI funding")
        }
    }

    #[tokio::test]
    async fn fetch_passes_contextualized_query_to_engine() {
        let (fetcher, factory) = fetcher_with(Failures::default());
        let request = dated_request("2024-01-01T00:00:00Z", "2024-03-31T00:00:00Z");

        let result = fetcher.fetch(&request).await;

        let tasks = factory.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].query.contains("2024-01-01"));
        assert!(tasks[0].query.contains("2024-03-31"));
        assert!(tasks[0].query.ends_with("within the specified date range."));
        assert!(result.report.starts_with("full report"));
        assert!(result.report.contains("Note: This report only contains information"));
        assert!(result.execution_time >= 0.0);
    }

    #[tokio::test]
    async fn fetch_swaps_reversed_window() {
        let (fetcher, factory) = fetcher_with(Failures::default());
        let request = dated_request("2024-06-01", "2024-01-01");

        let result = fetcher.fetch(&request).await;

        assert!(result.start_date < result.end_date);
        let tasks = factory.tasks.lock().unwrap();
        assert!(tasks[0].query.contains("from 2024-01-01 to 2024-06-01"));
    }

    #[tokio::test]
    async fn missing_dates_default_to_now() {
        let (fetcher, _) = fetcher_with(Failures::default());
        let now = parse_timestamp("2024-05-05T15:00:00Z").unwrap();

        let result = fetcher.fetch_at(&ResearchRequest::new("q"), now).await;

        assert_eq!(result.start_date, now);
        assert_eq!(result.end_date, now);
    }

    #[tokio::test]
    async fn research_failure_still_writes_report() {
        let (fetcher, _) = fetcher_with(Failures {
            research: true,
            report: false,
        });

        let chunks: Vec<ReportChunk> = fetcher.stream(ResearchRequest::new("q")).collect().await;

        assert_eq!(chunks[0], ReportChunk::status("Starting research..."));
        let error = chunks[1].as_error().expect("research error chunk");
        assert!(error.contains("Error during research"));
        assert!(error.contains("search backend unreachable"));
        assert_eq!(chunks[2], ReportChunk::status("Writing report..."));
        assert!(chunks[3].as_report().unwrap().starts_with("partial report"));
        assert!(*chunks[4].as_timing().unwrap() >= 0.0);
        assert_eq!(chunks.len(), 5);
    }

    #[tokio::test]
    async fn failures_in_both_steps_yield_fallback() {
        let (fetcher, _) = fetcher_with(Failures {
            research: true,
            report: true,
        });

        let result = fetcher.fetch(&ResearchRequest::new("q")).await;

        assert_eq!(result.report, FALLBACK_REPORT);
        assert!(result.execution_time >= 0.0);
    }

    #[tokio::test]
    async fn successful_stream_follows_step_order() {
        let (fetcher, _) = fetcher_with(Failures::default());

        let chunks: Vec<ReportChunk> = fetcher.stream(ResearchRequest::new("q")).collect().await;
        let statuses: Vec<&String> = chunks.iter().filter_map(ReportChunk::as_status).collect();

        assert_eq!(statuses, ["Starting research...", "Research completed.", "Writing report..."]);
        assert!(chunks.iter().all(|chunk| chunk.as_error().is_none()));
        assert!(chunks.last().unwrap().as_timing().is_some());
    }

    struct PanickingResearcher;

    #[async_trait]
    impl Researcher for PanickingResearcher {
        async fn conduct_research(&mut self) -> anyhow::Result<()> {
            panic!("index out of range");
        }

        async fn write_report(&mut self) -> anyhow::Result<String> {
            panic!("writer crashed");
        }
    }

    struct PanickingFactory;

    impl ResearcherFactory for PanickingFactory {
        fn build(&self, _task: ResearchTask) -> Box<dyn Researcher> {
            Box::new(PanickingResearcher)
        }
    }

    #[tokio::test]
    async fn engine_panics_end_in_fallback_and_timing() {
        let fetcher = ReportFetcher::new(Arc::new(PanickingFactory));

        let chunks: Vec<ReportChunk> = fetcher.stream(ResearchRequest::new("q")).collect().await;

        assert_eq!(chunks.len(), 6);
        let research_error = chunks[1].as_error().unwrap();
        assert!(research_error.contains("Error during research"));
        assert!(research_error.contains("engine panicked: index out of range"));
        assert_eq!(chunks[2], ReportChunk::status("Writing report..."));
        assert!(chunks[3].as_error().unwrap().contains("writer crashed"));
        assert_eq!(chunks[4], ReportChunk::Report(FALLBACK_REPORT.to_string()));
        assert!(chunks[5].as_timing().is_some());
    }

    struct HangingResearcher {
        dropped: Arc<AtomicBool>,
    }

    impl Drop for HangingResearcher {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Researcher for HangingResearcher {
        async fn conduct_research(&mut self) -> anyhow::Result<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }

        async fn write_report(&mut self) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    struct HangingFactory {
        dropped: Arc<AtomicBool>,
    }

    impl ResearcherFactory for HangingFactory {
        fn build(&self, _task: ResearchTask) -> Box<dyn Researcher> {
            Box::new(HangingResearcher {
                dropped: self.dropped.clone(),
            })
        }
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_engine() {
        let dropped = Arc::new(AtomicBool::new(false));
        let fetcher = ReportFetcher::new(Arc::new(HangingFactory {
            dropped: dropped.clone(),
        }));

        let mut chunks = Box::pin(fetcher.stream(ResearchRequest::new("q")));
        assert_eq!(chunks.next().await, Some(ReportChunk::status("Starting research...")));
        let stalled = tokio::time::timeout(Duration::from_millis(50), chunks.next()).await;
        assert!(stalled.is_err());
        assert!(!dropped.load(Ordering::SeqCst));

        drop(chunks);
        assert!(dropped.load(Ordering::SeqCst));
    }
}

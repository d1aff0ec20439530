//! Streaming API: emit file reports as they complete.
//!
//! Large batches take a while. A stream lets callers show results as soon as
//! each file finishes, or write them out incrementally, instead of waiting
//! for [`crate::sanitize::sanitize_batch`] to return the whole batch.
//!
//! Reports arrive in completion order, not input order. Sort by
//! [`FileReport::index`] if order matters.

use crate::cancel::CancelToken;
use crate::config::SanitizerConfig;
use crate::error::SanitizeError;
use crate::orchestrator::Pipeline;
use crate::output::FileReport;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of file reports.
pub type ReportStream = Pin<Box<dyn Stream<Item = FileReport> + Send>>;

/// Sanitize `paths`, streaming each report as its file finishes.
///
/// # Returns
/// - `Ok(ReportStream)`, one item per input path
/// - `Err(SanitizeError)` when no model provider could be resolved
///
/// # Example
/// ```rust,no_run
/// use doc_sanitizer::{sanitize_stream, CancelToken, SanitizerConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let paths = vec!["deck.pptx".into(), "scan.png".into()];
/// let mut reports = sanitize_stream(paths, &SanitizerConfig::default(), CancelToken::new())?;
/// while let Some(report) = reports.next().await {
///     println!("#{} {:?}", report.index, report.outcome);
/// }
/// # Ok(())
/// # }
/// ```
pub fn sanitize_stream(
    paths: Vec<PathBuf>,
    config: &SanitizerConfig,
    cancel: CancelToken,
) -> Result<ReportStream, SanitizeError> {
    let pipeline = Arc::new(Pipeline::from_config(config)?);
    Ok(pipeline_stream(pipeline, paths, cancel))
}

/// Stream reports from an already-built pipeline.
pub fn pipeline_stream(
    pipeline: Arc<Pipeline>,
    paths: Vec<PathBuf>,
    cancel: CancelToken,
) -> ReportStream {
    let concurrency = pipeline.config().concurrency;
    info!(
        "Starting streaming sanitization of {} files (concurrency {})",
        paths.len(),
        concurrency
    );

    let s = stream::iter(paths.into_iter().enumerate().map(move |(index, path)| {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        async move { pipeline.process_file(index, &path, &cancel).await }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}

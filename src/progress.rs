//! Progress-callback trait for per-file sanitisation events.
//!
//! Inject an [`Arc<dyn SanitizeProgressCallback>`] via
//! [`crate::config::SanitizerConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves each file through its stages.
//!
//! # Example
//!
//! ```rust
//! use doc_sanitizer::{SanitizeProgressCallback, SanitizerConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl SanitizeProgressCallback for CountingCallback {
//!     fn on_file_assembled(&self, index: usize, file_name: &str) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("#{index} {file_name} done ({n} so far)");
//!     }
//! }
//!
//! let config = SanitizerConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Stage;
use std::sync::Arc;

/// Called by the pipeline as it processes a batch.
///
/// Files are processed concurrently, so per-file methods may be called from
/// several tasks at once. All methods default to no-ops.
pub trait SanitizeProgressCallback: Send + Sync {
    /// Called once before any file is routed.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a worker picks up a file.
    fn on_file_start(&self, index: usize, file_name: &str) {
        let _ = (index, file_name);
    }

    /// Called each time a file enters a stage.
    fn on_stage(&self, index: usize, file_name: &str, stage: Stage) {
        let _ = (index, file_name, stage);
    }

    /// Called when a file reaches `Assembled`.
    fn on_file_assembled(&self, index: usize, file_name: &str) {
        let _ = (index, file_name);
    }

    /// Called when a file ends in `Failed`.
    fn on_file_failed(&self, index: usize, file_name: &str, stage: Stage, error: &str) {
        let _ = (index, file_name, stage, error);
    }

    /// Called once after every file has been attempted.
    fn on_batch_complete(&self, total_files: usize, assembled: usize) {
        let _ = (total_files, assembled);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl SanitizeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SanitizerConfig`].
pub type ProgressCallback = Arc<dyn SanitizeProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SanitizeProgressCallback for Recorder {
        fn on_stage(&self, index: usize, _file_name: &str, stage: Stage) {
            self.events.lock().unwrap().push(format!("{index}:{stage}"));
        }

        fn on_file_failed(&self, index: usize, _file_name: &str, stage: Stage, _error: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{index}:failed@{stage}"));
        }
    }

    #[test]
    fn noop_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(2);
        cb.on_file_start(0, "a.png");
        cb.on_stage(0, "a.png", Stage::Routing);
        cb.on_file_assembled(0, "a.png");
        cb.on_file_failed(1, "b.docx", Stage::Routing, "unsupported");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Recorder::default();
        rec.on_stage(3, "x.pdf", Stage::Extracting);
        rec.on_file_failed(3, "x.pdf", Stage::Sanitizing, "boom");
        rec.on_file_assembled(3, "x.pdf");
        let events = rec.events.lock().unwrap();
        assert_eq!(*events, vec!["3:extracting", "3:failed@sanitizing"]);
    }
}

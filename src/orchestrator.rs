//! The per-file state machine and the concurrent batch runner.
//!
//! ```text
//! Routing ──▶ Extracting ──▶ Sanitizing ──▶ Analyzing ──▶ Assembled
//!    │             │              │              │
//!    └─────────────┴──────────────┴──────────────┴──▶ Failed(stage, error)
//! ```
//!
//! Only three things end a file early: an unsupported extension, name
//! redaction failing under [`NameRedactionPolicy::AbortFile`], and
//! cancellation. Driver and analysis failures degrade the record instead and
//! are listed in [`FileReport::warnings`].
//!
//! Files run concurrently up to `config.concurrency`; each file's stages run
//! in order. Every worker builds its own [`FileReport`] and the batch merges
//! them once at the end, sorted by input index.

use crate::cancel::CancelToken;
use crate::collaborators::{DocumentTextExtractor, PdfRasteriser};
use crate::config::{NameRedactionPolicy, SanitizerConfig};
use crate::error::{FileError, RedactionError, SanitizeError};
use crate::models::{Capability, ModelManager, ModelProvider};
use crate::output::{BatchOutput, BatchStats, FileOutcome, FileReport, FinalRecord, Stage};
use crate::pipeline::extract::{self, ExtractContext};
use crate::pipeline::office::OfficeExtractor;
use crate::pipeline::postprocess::truncate_chars;
use crate::pipeline::render::PdfiumRasteriser;
use crate::pipeline::route::{extension_of, FileKind};
use crate::progress::SanitizeProgressCallback;
use crate::redact::{self, SanitizedText};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Findings placed in the record when the generator fails.
pub const FINDINGS_FALLBACK: &str = "ERROR: Key findings could not be generated.";

/// A configured pipeline: the model manager plus the two non-model
/// collaborators.
///
/// Build one per batch. The model manager lives as long as the pipeline, but
/// models themselves are only held while a stage needs them.
pub struct Pipeline {
    config: SanitizerConfig,
    models: ModelManager,
    documents: Arc<dyn DocumentTextExtractor>,
    rasteriser: Arc<dyn PdfRasteriser>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("models", &self.models)
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline around an explicit model provider.
    ///
    /// The document extractor and PDF rasteriser come from the config when
    /// set, else [`OfficeExtractor`] and [`PdfiumRasteriser`].
    pub fn new(config: SanitizerConfig, provider: Arc<dyn ModelProvider>) -> Self {
        let documents = config
            .document_extractor
            .clone()
            .unwrap_or_else(|| Arc::new(OfficeExtractor));
        let rasteriser = config
            .pdf_rasteriser
            .clone()
            .unwrap_or_else(|| Arc::new(PdfiumRasteriser::new(config.max_rendered_pixels)));
        Self {
            models: ModelManager::new(provider),
            config,
            documents,
            rasteriser,
        }
    }

    /// Build a pipeline from config alone, resolving the model provider the
    /// same way [`crate::sanitize_batch`] does.
    pub fn from_config(config: &SanitizerConfig) -> Result<Self, SanitizeError> {
        let provider = crate::sanitize::resolve_model_provider(config)?;
        Ok(Self::new(config.clone(), provider))
    }

    pub fn config(&self) -> &SanitizerConfig {
        &self.config
    }

    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    fn callback(&self) -> Option<&dyn SanitizeProgressCallback> {
        self.config.progress_callback.as_deref()
    }

    fn extract_context(&self) -> ExtractContext<'_> {
        ExtractContext {
            config: &self.config,
            models: &self.models,
            documents: self.documents.as_ref(),
            rasteriser: self.rasteriser.as_ref(),
        }
    }

    // ── Batch ────────────────────────────────────────────────────────────

    /// Process every path concurrently. Reports come back in input order.
    pub async fn process_batch(&self, paths: &[PathBuf], cancel: &CancelToken) -> BatchOutput {
        let start = Instant::now();
        let total = paths.len();
        info!(
            "Sanitizing {} files (concurrency {})",
            total, self.config.concurrency
        );
        if let Some(cb) = self.callback() {
            cb.on_batch_start(total);
        }

        let mut reports: Vec<FileReport> = stream::iter(paths.iter().enumerate())
            .map(|(index, path)| self.process_file(index, path, cancel))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        reports.sort_by_key(|r| r.index);

        let stats = batch_stats(&reports, start.elapsed().as_millis() as u64);
        info!(
            "Batch complete: {}/{} assembled, {} failed, {} degraded in {}ms",
            stats.assembled_files,
            stats.total_files,
            stats.failed_files,
            stats.degraded_files,
            stats.total_duration_ms
        );
        if let Some(cb) = self.callback() {
            cb.on_batch_complete(stats.total_files, stats.assembled_files);
        }
        debug!("Live models after batch: {:?}", self.models.live_capabilities());

        BatchOutput { reports, stats }
    }

    // ── Single file ──────────────────────────────────────────────────────

    /// Walk one file through the state machine. Never fails; the outcome is
    /// in the report.
    pub async fn process_file(&self, index: usize, path: &Path, cancel: &CancelToken) -> FileReport {
        let start = Instant::now();
        let file = display_name(path);
        if let Some(cb) = self.callback() {
            cb.on_file_start(index, &file);
        }

        let mut run = FileRun {
            index,
            file: &file,
            callback: self.callback(),
            stages: Vec::with_capacity(5),
            warnings: Vec::new(),
        };
        let outcome = self.run_stages(path, &mut run, cancel).await;
        let FileRun {
            stages, warnings, ..
        } = run;

        match &outcome {
            FileOutcome::Assembled(_) => {
                info!("#{} {}: assembled ({} warnings)", index, file, warnings.len());
                if let Some(cb) = self.callback() {
                    cb.on_file_assembled(index, &file);
                }
            }
            FileOutcome::Failed { stage, error } => {
                warn!("#{} {}: failed during {}: {}", index, file, stage, error);
                if let Some(cb) = self.callback() {
                    cb.on_file_failed(index, &file, *stage, &error.to_string());
                }
            }
        }

        FileReport {
            index,
            path: path.to_path_buf(),
            outcome,
            stages,
            warnings,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn run_stages(
        &self,
        path: &Path,
        run: &mut FileRun<'_>,
        cancel: &CancelToken,
    ) -> FileOutcome {
        let file = run.file;

        // ── Routing ──────────────────────────────────────────────────────
        run.enter(Stage::Routing);
        if cancel.is_cancelled() {
            return cancelled(file, Stage::Routing);
        }
        let kind = FileKind::from_path(path);
        if let FileKind::Unsupported(extension) = &kind {
            return FileOutcome::Failed {
                stage: Stage::Routing,
                error: FileError::UnsupportedInput {
                    file: file.to_string(),
                    extension: extension.clone(),
                },
            };
        }
        debug!("{}: routed as {}", file, kind);

        // ── Extracting ───────────────────────────────────────────────────
        run.enter(Stage::Extracting);
        let ctx = self.extract_context();
        let extracting = extract::extract(&ctx, &kind, path, file, &mut run.warnings);
        let Some(record) = cancel.run(extracting).await else {
            return cancelled(file, Stage::Extracting);
        };
        if let Some(error) = &record.error {
            run.warnings.push(error.clone());
        }

        // ── Sanitizing ───────────────────────────────────────────────────
        run.enter(Stage::Sanitizing);
        let sanitizing = self.sanitize(
            record.raw_text.text_or_empty(),
            record.description.as_display(),
            file,
            &mut run.warnings,
        );
        let (sanitized, description) = match cancel.run(sanitizing).await {
            None => return cancelled(file, Stage::Sanitizing),
            Some(Err(error)) => {
                return FileOutcome::Failed {
                    stage: Stage::Sanitizing,
                    error,
                }
            }
            Some(Ok(s)) => s,
        };

        // ── Analyzing ────────────────────────────────────────────────────
        run.enter(Stage::Analyzing);
        let analyzing = self.analyze(&description, &sanitized.text, file, &mut run.warnings);
        let Some((description, key_findings)) = cancel.run(analyzing).await else {
            return cancelled(file, Stage::Analyzing);
        };

        run.enter(Stage::Assembled);
        FileOutcome::Assembled(FinalRecord {
            file_name: file.to_string(),
            file_type: extension_of(path),
            description,
            key_findings,
        })
    }

    /// Redact the raw text and, when `scrub_description` is set, the
    /// description, applying the name-redaction policy when the recognizer
    /// cannot run. Both go through one recognizer call.
    async fn sanitize(
        &self,
        raw_text: &str,
        description: &str,
        file: &str,
        warnings: &mut Vec<FileError>,
    ) -> Result<(SanitizedText, String), FileError> {
        let parts: Vec<&str> = if self.config.scrub_description {
            vec![raw_text, description]
        } else {
            vec![raw_text]
        };
        if parts.iter().all(|p| p.is_empty()) {
            let sanitized = SanitizedText {
                names_redacted: true,
                ..Default::default()
            };
            return Ok((sanitized, description.to_string()));
        }

        let result = async {
            let capability = Capability::EntityRecognizer;
            let lease = self
                .models
                .acquire(capability, &self.config.models.options_for(capability))
                .await
                .map_err(|e| RedactionError::RecognizerUnavailable(e.to_string()))?;
            let recognizer = lease
                .entity_recognizer()
                .map_err(|e| RedactionError::RecognizerUnavailable(e.to_string()))?;
            redact::redact_parts(&parts, recognizer).await
        }
        .await;

        let redacted = match result {
            Ok(redacted) => redacted,
            Err(e) => match self.config.name_policy {
                NameRedactionPolicy::AbortFile => {
                    return Err(FileError::SanitizationFailure {
                        file: file.to_string(),
                        detail: e.to_string(),
                    })
                }
                NameRedactionPolicy::PatternOnly => {
                    warn!("{}: {}; continuing with pattern-only redaction", file, e);
                    warnings.push(FileError::SanitizationFailure {
                        file: file.to_string(),
                        detail: format!("{e}; names were not redacted"),
                    });
                    parts.iter().map(|p| redact::redact_without_names(p)).collect()
                }
            },
        };

        let mut redacted = redacted.into_iter();
        let sanitized = redacted.next().unwrap_or_default();
        let description = match redacted.next() {
            Some(scrubbed) => scrubbed.text,
            None => description.to_string(),
        };
        debug!(
            "{}: redacted {} names, {} emails, {} phones",
            file, sanitized.counts.names, sanitized.counts.emails, sanitized.counts.phones
        );
        Ok((sanitized, description))
    }

    /// Pattern pass over generated text, which never goes back through the
    /// recognizer.
    fn scrub(&self, text: &str) -> String {
        if self.config.scrub_description {
            redact::redact_patterns(text)
        } else {
            text.to_string()
        }
    }

    /// Refined description and findings, or the fallbacks.
    async fn analyze(
        &self,
        description: &str,
        sanitized: &str,
        file: &str,
        warnings: &mut Vec<FileError>,
    ) -> (String, String) {
        let snippet = truncate_chars(sanitized, self.config.analysis_snippet_chars);
        let result = async {
            let capability = Capability::Generator;
            let lease = self
                .models
                .acquire(capability, &self.config.models.options_for(capability))
                .await?;
            lease.generator()?.analyze(description, snippet).await
        }
        .await;

        match result {
            Ok(analysis) => {
                let refined = analysis.description.trim();
                let refined = if refined.is_empty() {
                    description.to_string()
                } else {
                    self.scrub(refined)
                };
                let findings = analysis.findings.trim();
                let findings = if findings.is_empty() {
                    FINDINGS_FALLBACK.to_string()
                } else {
                    findings.to_string()
                };
                (refined, findings)
            }
            Err(e) => {
                warn!("{}: analysis failed: {}", file, e);
                warnings.push(FileError::AnalysisFailure {
                    file: file.to_string(),
                    detail: e.to_string(),
                });
                (description.to_string(), FINDINGS_FALLBACK.to_string())
            }
        }
    }
}

/// Per-file bookkeeping: the stage trace and collected warnings.
struct FileRun<'a> {
    index: usize,
    file: &'a str,
    callback: Option<&'a dyn SanitizeProgressCallback>,
    stages: Vec<Stage>,
    warnings: Vec<FileError>,
}

impl FileRun<'_> {
    fn enter(&mut self, stage: Stage) {
        debug!("#{} {}: {}", self.index, self.file, stage);
        self.stages.push(stage);
        if let Some(cb) = self.callback {
            cb.on_stage(self.index, self.file, stage);
        }
    }
}

fn cancelled(file: &str, stage: Stage) -> FileOutcome {
    FileOutcome::Failed {
        stage,
        error: FileError::Cancelled {
            file: file.to_string(),
            stage,
        },
    }
}

/// The last path component, or the whole path when there is none.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn batch_stats(reports: &[FileReport], total_duration_ms: u64) -> BatchStats {
    let failed_files = reports.iter().filter(|r| r.is_failed()).count();
    let degraded_files = reports
        .iter()
        .filter(|r| !r.is_failed() && !r.warnings.is_empty())
        .count();
    BatchStats {
        total_files: reports.len(),
        assembled_files: reports.len() - failed_files,
        failed_files,
        degraded_files,
        total_duration_ms,
    }
}

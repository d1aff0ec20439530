//! # doc-sanitizer
//!
//! Strip logos and personal data from slide decks, spreadsheets, images and
//! PDFs, then describe and analyse what is left with pluggable content models.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Routing     pick a driver by extension (pptx/xlsx, png/jpg/jpeg, pdf)
//!  ├─ 2. Extracting  document text / image pixels / rendered PDF pages
//!  │                 pixels: logo removal (NCC + Telea inpainting) → caption → OCR
//!  ├─ 3. Sanitizing  names → [NAME_REMOVED], emails, phone numbers
//!  ├─ 4. Analyzing   refined description + key findings
//!  └─ 5. Assembled   one FinalRecord row per file
//! ```
//!
//! A file that fails at some stage ends in `Failed(stage, error)`; the rest of
//! the batch carries on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc_sanitizer::{sanitize_dir, SanitizerConfig, TemplateSet};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = SanitizerConfig::builder()
//!         .templates(TemplateSet::load_dir("logos/")?)
//!         .build()?;
//!     let output = sanitize_dir("inbox/", &config).await?;
//!     println!("{}", output.to_table());
//!     eprintln!("{} assembled, {} failed",
//!         output.stats.assembled_files,
//!         output.stats.failed_files);
//!     Ok(())
//! }
//! ```
//!
//! ## Content models
//!
//! Captioning, OCR, summaries, grammar polish, name recognition and analysis
//! are reached through the traits in [`collaborators`]. By default they are
//! served by an `edgequake-llm` provider; pass your own
//! [`models::ModelProvider`] to run local models instead. Models are loaded on
//! first use, shared between workers, and unloaded as soon as no stage holds a
//! lease on them.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod logo;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod redact;
pub mod sanitize;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelToken;
pub use collaborators::{Analysis, EntitySpan};
pub use config::{NameRedactionPolicy, SanitizerConfig, SanitizerConfigBuilder};
pub use error::{FileError, SanitizeError};
pub use logo::{remove_logos, LogoOptions, LogoRemoval, TemplateSet};
pub use models::{AcquireOptions, Capability, Device, ModelManager, ModelSettings, Precision};
pub use orchestrator::Pipeline;
pub use output::{BatchOutput, BatchStats, FileOutcome, FileReport, FinalRecord, Stage};
pub use progress::{NoopProgressCallback, SanitizeProgressCallback};
pub use redact::{redact, SanitizedText};
pub use sanitize::{
    sanitize_batch, sanitize_batch_with_cancel, sanitize_bytes, sanitize_dir, sanitize_dir_sync,
    sanitize_file, write_output,
};
pub use stream::{sanitize_stream, ReportStream};

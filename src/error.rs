//! Error types for the doc-sanitizer library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SanitizeError`] is **fatal**: the batch cannot run at all (missing input
//!   directory, no model provider, invalid configuration). Returned as
//!   `Err(SanitizeError)` from the top-level `sanitize*` functions.
//!
//! * [`FileError`] is **non-fatal**: a single file failed at one stage but the
//!   rest of the batch is fine. Stored inside [`crate::output::FileReport`] so
//!   callers can inspect partial success rather than losing the whole batch to
//!   one bad file.
//!
//! The component engines have their own narrow errors ([`RedactionError`],
//! [`LogoError`], [`ModelError`], [`CollaboratorError`]); the orchestrator maps
//! them onto [`FileError`] together with the stage and file name.

use crate::models::Capability;
use crate::output::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the doc-sanitizer library.
///
/// Per-file failures use [`FileError`] and are stored in
/// [`crate::output::FileReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum SanitizeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Batch input directory was not found.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is readable.")]
    InputDirNotFound { path: PathBuf },

    /// The batch input path exists but is not a directory.
    #[error("Input path is not a directory: '{path}'")]
    NotADirectory { path: PathBuf },

    /// The batch input directory could not be listed.
    #[error("Failed to read input directory '{path}': {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A logo template could not be decoded.
    #[error("Failed to load logo template '{path}': {detail}")]
    TemplateLoadFailed { path: PathBuf, detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Model provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the rendered batch table.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single file.
///
/// Every variant names the file and the cause so a failure can be reproduced
/// from the report alone. The batch always continues past a `FileError`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum FileError {
    /// The extension does not map to any extraction driver.
    #[error("{file}: unsupported file type '.{extension}'")]
    UnsupportedInput { file: String, extension: String },

    /// A driver or model failed while extracting; the record degrades to
    /// placeholder content rather than aborting.
    #[error("{file}: extraction failed: {detail}")]
    ExtractionFailure { file: String, detail: String },

    /// The redaction engine could not guarantee name removal.
    #[error("{file}: sanitization failed: {detail}")]
    SanitizationFailure { file: String, detail: String },

    /// The generative collaborator failed; findings fall back to a placeholder.
    #[error("{file}: analysis failed: {detail}")]
    AnalysisFailure { file: String, detail: String },

    /// Processing was cancelled cooperatively.
    #[error("{file}: cancelled during {stage}")]
    Cancelled { file: String, stage: Stage },
}

impl FileError {
    /// The pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            FileError::UnsupportedInput { .. } => Stage::Routing,
            FileError::ExtractionFailure { .. } => Stage::Extracting,
            FileError::SanitizationFailure { .. } => Stage::Sanitizing,
            FileError::AnalysisFailure { .. } => Stage::Analyzing,
            FileError::Cancelled { stage, .. } => *stage,
        }
    }
}

/// Failure reported by an external collaborator (model, parser, renderer).
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// The collaborator is not loaded or cannot be reached.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The underlying model returned an error.
    #[error("model error: {0}")]
    Model(String),

    /// Reading the input failed.
    #[error("I/O error on '{path}': {detail}")]
    Io { path: PathBuf, detail: String },

    /// The input was read but could not be parsed.
    #[error("format error: {0}")]
    Format(String),

    /// The call did not finish within the configured timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Errors from the redaction engine.
#[derive(Debug, Clone, Error)]
pub enum RedactionError {
    /// Entity recognition could not run, so names cannot be guaranteed removed.
    #[error("entity recognizer unavailable: {0}")]
    RecognizerUnavailable(String),
}

/// Errors from the logo removal engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogoError {
    /// The target image has a zero dimension.
    #[error("image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// A template has a zero dimension.
    #[error("template '{name}' is empty ({width}x{height})")]
    EmptyTemplate {
        name: String,
        width: u32,
        height: u32,
    },
}

/// Errors from the model resource manager.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The provider failed to load the requested capability.
    #[error("failed to load {capability} model: {detail}")]
    LoadFailed {
        capability: Capability,
        detail: String,
    },

    /// The provider returned a handle for a different capability.
    #[error("provider returned a {found} handle for a {expected} request")]
    CapabilityMismatch {
        expected: Capability,
        found: Capability,
    },
}

impl From<ModelError> for CollaboratorError {
    fn from(e: ModelError) -> Self {
        CollaboratorError::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_input_display() {
        let e = FileError::UnsupportedInput {
            file: "report.docx".into(),
            extension: "docx".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("report.docx"), "got: {msg}");
        assert!(msg.contains(".docx"), "got: {msg}");
        assert_eq!(e.stage(), Stage::Routing);
    }

    #[test]
    fn cancelled_keeps_its_stage() {
        let e = FileError::Cancelled {
            file: "a.png".into(),
            stage: Stage::Analyzing,
        };
        assert_eq!(e.stage(), Stage::Analyzing);
        assert!(e.to_string().contains("analyzing"));
    }

    #[test]
    fn input_dir_not_found_display() {
        let e = SanitizeError::InputDirNotFound {
            path: PathBuf::from("/nope"),
        };
        assert!(e.to_string().contains("/nope"));
    }

    #[test]
    fn model_error_converts_to_unavailable() {
        let e: CollaboratorError = ModelError::LoadFailed {
            capability: Capability::Ocr,
            detail: "out of memory".into(),
        }
        .into();
        match e {
            CollaboratorError::Unavailable(msg) => assert!(msg.contains("out of memory")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn file_error_serialises() {
        let e = FileError::AnalysisFailure {
            file: "deck.pptx".into(),
            detail: "timeout".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        assert!(json.contains("AnalysisFailure"));
    }
}

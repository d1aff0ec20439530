//! Interfaces of the external content models.
//!
//! The pipeline never implements captioning, OCR, summarisation, generation or
//! entity recognition itself. It calls these traits, and the
//! [`crate::models::ModelManager`] decides when an implementation is loaded and
//! when it is dropped. Default adapters live in [`crate::pipeline::llm`],
//! [`crate::pipeline::office`] and [`crate::pipeline::render`]; tests swap in
//! in-memory fakes.
//!
//! All traits are `Send + Sync` because a single loaded model is shared by
//! every worker in a batch.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Label the redaction engine acts on.
pub const PERSON_LABEL: &str = "PERSON";

/// A labelled entity over a text buffer.
///
/// `start` and `end` are **byte** offsets into the UTF-8 buffer that was passed
/// to the recognizer (`end` exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub start: usize,
    pub end: usize,
    pub label: String,
}

impl EntitySpan {
    pub fn new(start: usize, end: usize, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    pub fn person(start: usize, end: usize) -> Self {
        Self::new(start, end, PERSON_LABEL)
    }

    pub fn is_person(&self) -> bool {
        self.label == PERSON_LABEL
    }
}

/// Output of the generative-analysis collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub description: String,
    pub findings: String,
}

/// Pulls ordered text fragments out of slide decks and spreadsheets.
#[async_trait]
pub trait DocumentTextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<Vec<String>, CollaboratorError>;
}

/// Renders every page of a PDF to a 3-channel image, in page order.
#[async_trait]
pub trait PdfRasteriser: Send + Sync {
    async fn rasterise(&self, path: &Path) -> Result<Vec<RgbImage>, CollaboratorError>;
}

#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    async fn caption(&self, image: &RgbImage) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait ImageOcr: Send + Sync {
    async fn recognize_text(&self, image: &RgbImage) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait TextSummarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    async fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>, CollaboratorError>;
}

#[async_trait]
pub trait GrammarPolisher: Send + Sync {
    async fn polish(&self, text: &str) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait GenerativeAnalyzer: Send + Sync {
    async fn analyze(&self, description: &str, snippet: &str)
        -> Result<Analysis, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_span_helpers() {
        let s = EntitySpan::person(3, 8);
        assert!(s.is_person());
        assert!(!EntitySpan::new(0, 2, "ORG").is_person());
    }
}

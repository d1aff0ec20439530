//! Extraction drivers: one per [`FileKind`], each producing an
//! [`ExtractionRecord`].
//!
//! Drivers never return an error. A failure becomes a record whose fields are
//! [`Extracted::Unavailable`] with an `ERROR: …` reason and whose `error` is
//! set; fail-soft fallbacks (summary truncation, unpolished descriptions,
//! blank PDF pages) push a warning instead.
//!
//! Pixels always go through logo removal before any model sees them.

use crate::collaborators::{DocumentTextExtractor, ImageOcr, PdfRasteriser};
use crate::config::SanitizerConfig;
use crate::error::{CollaboratorError, FileError};
use crate::logo;
use crate::models::{Capability, ModelLease, ModelManager};
use crate::output::{Extracted, ExtractionRecord};
use crate::pipeline::route::FileKind;
use crate::pipeline::{input, postprocess};
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const EMPTY_DOCUMENT: &str = "Document appears to be empty or contains no text.";
pub const EMPTY_PDF: &str = "ERROR: PDF is empty or could not be read.";

/// What a driver needs from the pipeline.
pub(crate) struct ExtractContext<'a> {
    pub config: &'a SanitizerConfig,
    pub models: &'a ModelManager,
    pub documents: &'a dyn DocumentTextExtractor,
    pub rasteriser: &'a dyn PdfRasteriser,
}

/// Run the driver for `kind`. `kind` must be supported.
pub(crate) async fn extract(
    ctx: &ExtractContext<'_>,
    kind: &FileKind,
    path: &Path,
    file: &str,
    warnings: &mut Vec<FileError>,
) -> ExtractionRecord {
    let result = match kind {
        FileKind::Document(_) => extract_document(ctx, path, file, warnings).await,
        FileKind::Image => extract_image(ctx, path, file, warnings).await,
        FileKind::Pdf => extract_pdf(ctx, path, file, warnings).await,
        FileKind::Unsupported(ext) => Err(FileError::UnsupportedInput {
            file: file.to_string(),
            extension: ext.clone(),
        }),
    };
    match result {
        Ok(record) => record,
        Err(error) => {
            warn!("{}", error);
            ExtractionRecord::failed(kind.clone(), kind.label(), error)
        }
    }
}

fn failure(file: &str, detail: impl ToString) -> FileError {
    FileError::ExtractionFailure {
        file: file.to_string(),
        detail: detail.to_string(),
    }
}

impl ExtractContext<'_> {
    async fn lease(&self, capability: Capability) -> Result<ModelLease, CollaboratorError> {
        let options = self.config.models.options_for(capability);
        Ok(self.models.acquire(capability, &options).await?)
    }

    /// Remove configured logos off the async runtime.
    async fn scrub_logos(&self, image: RgbImage, file: &str) -> Result<RgbImage, FileError> {
        if self.config.templates.is_empty() {
            return Ok(image);
        }
        let templates = Arc::clone(&self.config.templates);
        let options = self.config.logo;
        let removal = tokio::task::spawn_blocking(move || {
            logo::remove_logos(&image, &templates, &options)
        })
        .await
        .map_err(|e| failure(file, format!("logo removal task panicked: {e}")))?
        .map_err(|e| failure(file, format!("logo removal failed: {e}")))?;
        if removal.matches > 0 {
            info!(
                "{}: removed {} logo matches ({} px)",
                file, removal.matches, removal.masked_pixels
            );
        }
        Ok(removal.image)
    }

    /// Caption + OCR + polish for one image. Returns (description, ocr text).
    async fn describe(
        &self,
        image: &RgbImage,
        ocr: &dyn ImageOcr,
        file: &str,
        warnings: &mut Vec<FileError>,
    ) -> Result<(String, String), FileError> {
        let caption = {
            let lease = self.lease(Capability::Captioner).await.map_err(|e| failure(file, e))?;
            let captioner = lease.captioner().map_err(|e| failure(file, e))?;
            captioner.caption(image).await.map_err(|e| failure(file, e))?
        };
        let text = ocr.recognize_text(image).await.map_err(|e| failure(file, e))?;
        let combined = postprocess::combine_description(&caption, &text);
        let description = self.polish(&combined, file, warnings).await;
        Ok((description, text.trim().to_string()))
    }

    async fn polish(&self, text: &str, file: &str, warnings: &mut Vec<FileError>) -> String {
        let polished = async {
            let lease = self.lease(Capability::GrammarChecker).await?;
            lease.grammar_checker()?.polish(text).await
        }
        .await;
        match polished {
            Ok(p) if !p.trim().is_empty() => p.trim().to_string(),
            Ok(_) => text.to_string(),
            Err(e) => {
                warn!("{}: grammar polish failed, keeping unpolished text: {}", file, e);
                warnings.push(failure(file, format!("grammar polish unavailable: {e}")));
                text.to_string()
            }
        }
    }

    async fn summarize(&self, text: &str, file: &str, warnings: &mut Vec<FileError>) -> String {
        let input = postprocess::truncate_chars(text, self.config.summary_input_chars);
        let summary = async {
            let lease = self.lease(Capability::Summarizer).await?;
            lease.summarizer()?.summarize(input).await
        }
        .await;
        match summary {
            Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
            other => {
                let detail = match other {
                    Err(e) => e.to_string(),
                    Ok(_) => "empty summary".to_string(),
                };
                warn!("{}: summarization failed, falling back to truncation: {}", file, detail);
                warnings.push(failure(file, format!("summarizer unavailable: {detail}")));
                postprocess::truncate_with_ellipsis(text, self.config.summary_fallback_chars)
            }
        }
    }
}

// ── Document ─────────────────────────────────────────────────────────────────

async fn extract_document(
    ctx: &ExtractContext<'_>,
    path: &Path,
    file: &str,
    warnings: &mut Vec<FileError>,
) -> Result<ExtractionRecord, FileError> {
    let fragments = ctx
        .documents
        .extract_text(path)
        .await
        .map_err(|e| failure(file, e))?;
    let raw_text = fragments.join("\n").trim().to_string();
    debug!("{}: {} fragments, {} chars", file, fragments.len(), raw_text.len());

    let description = if raw_text.is_empty() {
        EMPTY_DOCUMENT.to_string()
    } else {
        ctx.summarize(&raw_text, file, warnings).await
    };

    Ok(ExtractionRecord {
        kind: FileKind::from_path(path),
        description: Extracted::Text(description),
        raw_text: Extracted::Text(raw_text),
        error: None,
    })
}

// ── Image ────────────────────────────────────────────────────────────────────

async fn load_rgb(path: &Path, file: &str) -> Result<RgbImage, FileError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgb8()))
        .await
        .map_err(|e| failure(file, format!("decode task panicked: {e}")))?
        .map_err(|e| failure(file, e))
}

async fn extract_image(
    ctx: &ExtractContext<'_>,
    path: &Path,
    file: &str,
    warnings: &mut Vec<FileError>,
) -> Result<ExtractionRecord, FileError> {
    let resolved = input::resolve_input(path, ctx.config.download_timeout_secs)
        .await
        .map_err(|e| failure(file, e))?;
    let image = load_rgb(resolved.path(), file).await?;
    let image = ctx.scrub_logos(image, file).await?;

    let lease = ctx.lease(Capability::Ocr).await.map_err(|e| failure(file, e))?;
    let ocr = lease.ocr().map_err(|e| failure(file, e))?;
    let (description, text) = ctx.describe(&image, ocr, file, warnings).await?;

    Ok(ExtractionRecord {
        kind: FileKind::Image,
        description: Extracted::Text(description),
        raw_text: Extracted::Text(text),
        error: None,
    })
}

// ── PDF ──────────────────────────────────────────────────────────────────────

async fn extract_pdf(
    ctx: &ExtractContext<'_>,
    path: &Path,
    file: &str,
    warnings: &mut Vec<FileError>,
) -> Result<ExtractionRecord, FileError> {
    let pages = ctx.rasteriser.rasterise(path).await.map_err(|e| failure(file, e))?;
    if pages.is_empty() {
        warn!("{}: no pages rendered", file);
        return Ok(ExtractionRecord {
            kind: FileKind::Pdf,
            description: Extracted::unavailable(EMPTY_PDF),
            raw_text: Extracted::unavailable(""),
            error: Some(failure(file, "PDF has no pages")),
        });
    }
    let total = pages.len();
    info!("{}: {} pages", file, total);

    // One OCR lease covers every page.
    let lease = ctx.lease(Capability::Ocr).await.map_err(|e| failure(file, e))?;
    let ocr = lease.ocr().map_err(|e| failure(file, e))?;

    let mut description = String::new();
    let mut texts = Vec::with_capacity(total);
    for (i, page) in pages.into_iter().enumerate() {
        let page = ctx.scrub_logos(page, file).await?;
        if i == 0 {
            let (d, text) = ctx.describe(&page, ocr, file, warnings).await?;
            description = d;
            texts.push(text);
            continue;
        }
        match ocr.recognize_text(&page).await {
            Ok(text) => texts.push(text.trim().to_string()),
            Err(e) => {
                warn!("{}: OCR failed on page {}/{}: {}", file, i + 1, total, e);
                warnings.push(failure(file, format!("page {}: {e}", i + 1)));
                texts.push(String::new());
            }
        }
    }

    Ok(ExtractionRecord {
        kind: FileKind::Pdf,
        description: Extracted::Text(description),
        raw_text: Extracted::Text(texts.join(&ctx.config.page_break).trim().to_string()),
        error: None,
    })
}

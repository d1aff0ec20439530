//! Configuration types for document sanitisation.
//!
//! Every behaviour of the pipeline is controlled through [`SanitizerConfig`],
//! built via [`SanitizerConfigBuilder`]. Collaborators (model provider, office
//! extractor, PDF rasteriser, progress callback) are injected here as trait
//! objects; anything left unset gets the crate's default adapter.

use crate::collaborators::{DocumentTextExtractor, PdfRasteriser};
use crate::error::SanitizeError;
use crate::logo::{LogoOptions, TemplateSet};
use crate::models::{ModelProvider, ModelSettings};
use crate::progress::SanitizeProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Separator placed between the OCR text of consecutive PDF pages.
pub const DEFAULT_PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// What to do with a file when the entity recognizer cannot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NameRedactionPolicy {
    /// Fail the file at the sanitizing stage. (default)
    #[default]
    AbortFile,
    /// Redact emails and phone numbers only and flag the file as degraded.
    PatternOnly,
}

/// Configuration for a sanitisation run.
///
/// Built via [`SanitizerConfig::builder()`] or [`SanitizerConfig::default()`].
///
/// # Example
/// ```rust
/// use doc_sanitizer::{NameRedactionPolicy, SanitizerConfig};
///
/// let config = SanitizerConfig::builder()
///     .concurrency(2)
///     .logo_threshold(0.85)
///     .name_policy(NameRedactionPolicy::PatternOnly)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Clone)]
pub struct SanitizerConfig {
    /// Files processed at the same time. Default: 4.
    ///
    /// Each in-flight file holds its stage's model leases, so this also bounds
    /// how many callers share one loaded model.
    pub concurrency: usize,

    /// Logo detection threshold and inpainting radius.
    pub logo: LogoOptions,

    /// Logos to remove from images and PDF pages. Default: empty.
    pub templates: Arc<TemplateSet>,

    /// Behaviour when entity recognition is unavailable. Default: `AbortFile`.
    pub name_policy: NameRedactionPolicy,

    /// Redact the description too: names, emails and phone numbers.
    /// Default: true.
    ///
    /// Captions and OCR-derived descriptions can quote people and contact
    /// details verbatim.
    pub scrub_description: bool,

    /// Characters of document text handed to the summarizer. Default: 1024.
    pub summary_input_chars: usize,

    /// Characters kept when the summarizer fails and the description falls
    /// back to truncation. Default: 150.
    pub summary_fallback_chars: usize,

    /// Characters of sanitized text handed to the generator. Default: 1000.
    pub analysis_snippet_chars: usize,

    /// Separator between PDF page texts. Default: [`DEFAULT_PAGE_BREAK`].
    pub page_break: String,

    /// Longest rendered edge of a PDF page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Device and precision per model capability.
    pub models: ModelSettings,

    /// Loads the content models. If None, models are LLM-backed adapters over
    /// the provider resolved from `provider`/`provider_name`/environment.
    pub model_provider: Option<Arc<dyn ModelProvider>>,

    /// Slide deck and spreadsheet text extraction. Default: office parser.
    pub document_extractor: Option<Arc<dyn DocumentTextExtractor>>,

    /// PDF page rendering. Default: pdfium.
    pub pdf_rasteriser: Option<Arc<dyn PdfRasteriser>>,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for LLM-backed models. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens per LLM completion. Default: 1024.
    pub max_tokens: usize,

    /// Retries on a failed LLM call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-LLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for image URLs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-file progress events.
    pub progress_callback: Option<Arc<dyn SanitizeProgressCallback>>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            logo: LogoOptions::default(),
            templates: Arc::new(TemplateSet::new()),
            name_policy: NameRedactionPolicy::default(),
            scrub_description: true,
            summary_input_chars: 1024,
            summary_fallback_chars: 150,
            analysis_snippet_chars: 1000,
            page_break: DEFAULT_PAGE_BREAK.to_string(),
            max_rendered_pixels: 2000,
            models: ModelSettings::default(),
            model_provider: None,
            document_extractor: None,
            pdf_rasteriser: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 1024,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SanitizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizerConfig")
            .field("concurrency", &self.concurrency)
            .field("logo", &self.logo)
            .field("templates", &self.templates.len())
            .field("name_policy", &self.name_policy)
            .field("scrub_description", &self.scrub_description)
            .field("summary_input_chars", &self.summary_input_chars)
            .field("summary_fallback_chars", &self.summary_fallback_chars)
            .field("analysis_snippet_chars", &self.analysis_snippet_chars)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("models", &self.models)
            .field(
                "model_provider",
                &self.model_provider.as_ref().map(|_| "<dyn ModelProvider>"),
            )
            .field(
                "document_extractor",
                &self
                    .document_extractor
                    .as_ref()
                    .map(|_| "<dyn DocumentTextExtractor>"),
            )
            .field(
                "pdf_rasteriser",
                &self.pdf_rasteriser.as_ref().map(|_| "<dyn PdfRasteriser>"),
            )
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl SanitizerConfig {
    /// Create a new builder for `SanitizerConfig`.
    pub fn builder() -> SanitizerConfigBuilder {
        SanitizerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`SanitizerConfig`].
#[derive(Debug)]
pub struct SanitizerConfigBuilder {
    config: SanitizerConfig,
}

impl SanitizerConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn logo(mut self, options: LogoOptions) -> Self {
        self.config.logo = options;
        self
    }

    pub fn logo_threshold(mut self, threshold: f32) -> Self {
        self.config.logo.threshold = threshold;
        self
    }

    pub fn inpaint_radius(mut self, radius: u32) -> Self {
        self.config.logo.inpaint_radius = radius;
        self
    }

    pub fn templates(mut self, templates: TemplateSet) -> Self {
        self.config.templates = Arc::new(templates);
        self
    }

    pub fn name_policy(mut self, policy: NameRedactionPolicy) -> Self {
        self.config.name_policy = policy;
        self
    }

    pub fn scrub_description(mut self, v: bool) -> Self {
        self.config.scrub_description = v;
        self
    }

    pub fn summary_input_chars(mut self, n: usize) -> Self {
        self.config.summary_input_chars = n;
        self
    }

    pub fn summary_fallback_chars(mut self, n: usize) -> Self {
        self.config.summary_fallback_chars = n;
        self
    }

    pub fn analysis_snippet_chars(mut self, n: usize) -> Self {
        self.config.analysis_snippet_chars = n;
        self
    }

    pub fn page_break(mut self, sep: impl Into<String>) -> Self {
        self.config.page_break = sep.into();
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn models(mut self, settings: ModelSettings) -> Self {
        self.config.models = settings;
        self
    }

    pub fn model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.config.model_provider = Some(provider);
        self
    }

    pub fn document_extractor(mut self, extractor: Arc<dyn DocumentTextExtractor>) -> Self {
        self.config.document_extractor = Some(extractor);
        self
    }

    pub fn pdf_rasteriser(mut self, rasteriser: Arc<dyn PdfRasteriser>) -> Self {
        self.config.pdf_rasteriser = Some(rasteriser);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn SanitizeProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SanitizerConfig, SanitizeError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(SanitizeError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if !c.logo.threshold.is_finite() || c.logo.threshold <= 0.0 {
            return Err(SanitizeError::InvalidConfig(format!(
                "Logo threshold must be a positive number, got {}",
                c.logo.threshold
            )));
        }
        if c.logo.inpaint_radius == 0 || c.logo.inpaint_radius > 32 {
            return Err(SanitizeError::InvalidConfig(format!(
                "Inpaint radius must be 1–32, got {}",
                c.logo.inpaint_radius
            )));
        }
        if c.summary_input_chars == 0 || c.analysis_snippet_chars == 0 {
            return Err(SanitizeError::InvalidConfig(
                "Summary input and analysis snippet lengths must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = SanitizerConfig::default();
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.logo.threshold, 0.8);
        assert_eq!(c.logo.inpaint_radius, 3);
        assert_eq!(c.name_policy, NameRedactionPolicy::AbortFile);
        assert!(c.scrub_description);
        assert_eq!(c.summary_input_chars, 1024);
        assert_eq!(c.analysis_snippet_chars, 1000);
        assert_eq!(c.page_break, "\n\n--- Page Break ---\n\n");
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = SanitizerConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn rejects_bad_logo_options() {
        let err = SanitizerConfig::builder()
            .logo_threshold(f32::NAN)
            .build()
            .unwrap_err();
        assert!(matches!(err, SanitizeError::InvalidConfig(_)));

        let err = SanitizerConfig::builder().inpaint_radius(0).build().unwrap_err();
        assert!(err.to_string().contains("Inpaint radius"));
    }

    #[test]
    fn threshold_above_one_is_allowed() {
        let c = SanitizerConfig::builder().logo_threshold(1.01).build().unwrap();
        assert!(c.logo.threshold > 1.0);
    }

    #[test]
    fn debug_hides_trait_objects() {
        let c = SanitizerConfig::default();
        let s = format!("{c:?}");
        assert!(s.contains("SanitizerConfig"));
        assert!(s.contains("model_provider: None"));
    }
}

//! LLM-backed content models.
//!
//! Every capability the pipeline needs can be served by one
//! [`edgequake_llm::LLMProvider`]: vision models caption and transcribe
//! images, text models summarise, polish, recognise names and analyse.
//! [`LlmModelProvider`] plugs these adapters into the
//! [`crate::models::ModelManager`].
//!
//! ## Retry Strategy
//!
//! Transient API errors (429, 503, timeouts) are retried with exponential
//! backoff, `retry_backoff_ms * 2^(attempt-1)`: with 500 ms and 3 retries the
//! waits are 500 ms → 1 s → 2 s. Each attempt is bounded by
//! `api_timeout_secs`.

use crate::collaborators::{
    Analysis, EntityRecognizer, EntitySpan, GenerativeAnalyzer, GrammarPolisher, ImageCaptioner,
    ImageOcr, TextSummarizer,
};
use crate::config::SanitizerConfig;
use crate::error::{CollaboratorError, ModelError};
use crate::models::{AcquireOptions, Capability, ModelHandle, ModelProvider};
use crate::pipeline::{encode, postprocess};
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A provider plus the call policy shared by every adapter.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &"<dyn LLMProvider>")
            .field("max_retries", &self.max_retries)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &SanitizerConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }

    /// Send `messages`, retrying failures. Returns the cleaned reply text.
    pub async fn complete(
        &self,
        task: &str,
        messages: &[ChatMessage],
    ) -> Result<String, CollaboratorError> {
        let start = Instant::now();
        let mut last_err = CollaboratorError::Model("no attempt made".to_string());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    task, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let options = completion_options(self.temperature, self.max_tokens);
            let call = self.provider.chat(messages, Some(&options));
            match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        task,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(postprocess::clean_model_text(&response.content));
                }
                Ok(Err(e)) => {
                    warn!("{}: attempt {} failed: {}", task, attempt + 1, e);
                    last_err = CollaboratorError::Model(e.to_string());
                }
                Err(_) => {
                    warn!(
                        "{}: attempt {} timed out after {}s",
                        task,
                        attempt + 1,
                        self.timeout_secs
                    );
                    last_err = CollaboratorError::Timeout {
                        secs: self.timeout_secs,
                    };
                }
            }
        }
        Err(last_err)
    }

    async fn complete_text(
        &self,
        task: &str,
        system: &str,
        text: &str,
    ) -> Result<String, CollaboratorError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(text)];
        self.complete(task, &messages).await
    }

    async fn complete_image(
        &self,
        task: &str,
        system: &str,
        image: &RgbImage,
    ) -> Result<String, CollaboratorError> {
        let data = encode::encode_image(image)
            .map_err(|e| CollaboratorError::Format(format!("image encoding failed: {e}")))?;
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images("", vec![data]),
        ];
        self.complete(task, &messages).await
    }
}

/// Delay before retry number `attempt` (1-based).
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

fn completion_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

// ── Adapters ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LlmCaptioner(pub LlmClient);

#[async_trait]
impl ImageCaptioner for LlmCaptioner {
    async fn caption(&self, image: &RgbImage) -> Result<String, CollaboratorError> {
        let caption = self.0.complete_image("caption", prompts::CAPTION_PROMPT, image).await?;
        if caption.is_empty() {
            return Err(CollaboratorError::Model("empty caption".into()));
        }
        Ok(caption)
    }
}

#[derive(Debug, Clone)]
pub struct LlmOcr(pub LlmClient);

#[async_trait]
impl ImageOcr for LlmOcr {
    async fn recognize_text(&self, image: &RgbImage) -> Result<String, CollaboratorError> {
        let text = self.0.complete_image("ocr", prompts::OCR_PROMPT, image).await?;
        if text == prompts::NO_TEXT_MARKER {
            Ok(String::new())
        } else {
            Ok(text)
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSummarizer(pub LlmClient);

#[async_trait]
impl TextSummarizer for LlmSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, CollaboratorError> {
        let summary = self
            .0
            .complete_text("summarize", prompts::SUMMARY_PROMPT, text)
            .await?;
        if summary.is_empty() {
            return Err(CollaboratorError::Model("empty summary".into()));
        }
        Ok(summary)
    }
}

#[derive(Debug, Clone)]
pub struct LlmGrammarPolisher(pub LlmClient);

#[async_trait]
impl GrammarPolisher for LlmGrammarPolisher {
    async fn polish(&self, text: &str) -> Result<String, CollaboratorError> {
        let polished = self.0.complete_text("polish", prompts::POLISH_PROMPT, text).await?;
        if polished.is_empty() {
            return Err(CollaboratorError::Model("empty polish result".into()));
        }
        Ok(polished)
    }
}

/// Asks for a JSON list of person names and maps every whole-word
/// occurrence back to byte spans.
#[derive(Debug, Clone)]
pub struct LlmEntityRecognizer(pub LlmClient);

#[async_trait]
impl EntityRecognizer for LlmEntityRecognizer {
    async fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>, CollaboratorError> {
        let reply = self.0.complete_text("ner", prompts::NER_PROMPT, text).await?;
        let names = postprocess::parse_name_list(&reply).ok_or_else(|| {
            CollaboratorError::Format(format!(
                "expected a JSON array of names, got: {}",
                postprocess::truncate_chars(&reply, 80)
            ))
        })?;
        let spans = postprocess::name_spans(text, &names);
        debug!("ner: {} names → {} spans", names.len(), spans.len());
        Ok(spans)
    }
}

#[derive(Debug, Clone)]
pub struct LlmAnalyzer(pub LlmClient);

#[async_trait]
impl GenerativeAnalyzer for LlmAnalyzer {
    async fn analyze(
        &self,
        description: &str,
        snippet: &str,
    ) -> Result<Analysis, CollaboratorError> {
        let prompt = prompts::analysis_prompt(description, snippet);
        let messages = vec![ChatMessage::user(prompt)];
        let reply = self.0.complete("analyze", &messages).await?;
        let analysis = postprocess::split_analysis(&reply, description);
        if analysis.findings.is_empty() {
            return Err(CollaboratorError::Model("reply contained no findings".into()));
        }
        Ok(analysis)
    }
}

// ── Model provider ───────────────────────────────────────────────────────────

/// Serves every capability from one LLM provider.
///
/// Remote models have no local placement, so the acquire options are only
/// logged.
#[derive(Debug, Clone)]
pub struct LlmModelProvider {
    client: LlmClient,
}

impl LlmModelProvider {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &SanitizerConfig) -> Self {
        Self {
            client: LlmClient::new(provider, config),
        }
    }
}

#[async_trait]
impl ModelProvider for LlmModelProvider {
    async fn load(
        &self,
        capability: Capability,
        options: &AcquireOptions,
    ) -> Result<ModelHandle, ModelError> {
        debug!(
            "LLM-backed {} ignores placement {:?}/{:?}",
            capability, options.device, options.precision
        );
        let c = self.client.clone();
        Ok(match capability {
            Capability::Captioner => ModelHandle::Captioner(Arc::new(LlmCaptioner(c))),
            Capability::Ocr => ModelHandle::Ocr(Arc::new(LlmOcr(c))),
            Capability::Summarizer => ModelHandle::Summarizer(Arc::new(LlmSummarizer(c))),
            Capability::Generator => ModelHandle::Generator(Arc::new(LlmAnalyzer(c))),
            Capability::GrammarChecker => {
                ModelHandle::GrammarChecker(Arc::new(LlmGrammarPolisher(c)))
            }
            Capability::EntityRecognizer => {
                ModelHandle::EntityRecognizer(Arc::new(LlmEntityRecognizer(c)))
            }
        })
    }

    fn unload(&self, capability: Capability) {
        debug!("Released LLM-backed {} adapter", capability);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_options_from_defaults() {
        let config = SanitizerConfig::default();
        let opts = completion_options(config.temperature, config.max_tokens);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(1024));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(u64::MAX, 5), u64::MAX);
    }
}

//! Eager (whole-batch) entry points.
//!
//! These functions build a [`Pipeline`] from a [`SanitizerConfig`], run it,
//! and return once every file has reached `Assembled` or `Failed`. Use
//! [`crate::stream::sanitize_stream`] to receive reports as files finish.

use crate::cancel::CancelToken;
use crate::config::SanitizerConfig;
use crate::error::SanitizeError;
use crate::models::ModelProvider;
use crate::orchestrator::Pipeline;
use crate::output::{BatchOutput, FileReport};
use crate::pipeline::llm::LlmModelProvider;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Sanitize a batch of files.
///
/// # Returns
/// `Ok(BatchOutput)` whenever the batch could start, even if every file
/// failed (check `output.stats.failed_files`).
///
/// # Errors
/// Only fatal errors: no model provider could be resolved.
pub async fn sanitize_batch(
    paths: &[PathBuf],
    config: &SanitizerConfig,
) -> Result<BatchOutput, SanitizeError> {
    sanitize_batch_with_cancel(paths, config, &CancelToken::new()).await
}

/// [`sanitize_batch`] with cooperative cancellation.
///
/// Files still in flight when `cancel` fires end in
/// `Failed { stage, error: Cancelled }`; files that already finished keep
/// their outcome.
pub async fn sanitize_batch_with_cancel(
    paths: &[PathBuf],
    config: &SanitizerConfig,
    cancel: &CancelToken,
) -> Result<BatchOutput, SanitizeError> {
    let pipeline = Pipeline::from_config(config)?;
    Ok(pipeline.process_batch(paths, cancel).await)
}

/// Sanitize a single file or image URL.
pub async fn sanitize_file(
    path: impl AsRef<Path>,
    config: &SanitizerConfig,
) -> Result<FileReport, SanitizeError> {
    let pipeline = Pipeline::from_config(config)?;
    Ok(pipeline
        .process_file(0, path.as_ref(), &CancelToken::new())
        .await)
}

/// Sanitize every regular file in `dir`, in file-name order.
///
/// Hidden files (leading `.`) are skipped; everything else is routed, so
/// unsupported files show up as `Failed(Routing)` in the output.
pub async fn sanitize_dir(
    dir: impl AsRef<Path>,
    config: &SanitizerConfig,
) -> Result<BatchOutput, SanitizeError> {
    let paths = list_inputs(dir.as_ref()).await?;
    sanitize_batch(&paths, config).await
}

/// Synchronous wrapper around [`sanitize_dir`].
///
/// Creates a temporary tokio runtime internally.
pub fn sanitize_dir_sync(
    dir: impl AsRef<Path>,
    config: &SanitizerConfig,
) -> Result<BatchOutput, SanitizeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SanitizeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(sanitize_dir(dir, config))
}

/// Sanitize a file held in memory.
///
/// `file_name` decides the route (by its extension) and becomes the record's
/// file name. The bytes are written to a managed temp dir that is removed on
/// return.
///
/// # Example
/// ```rust,no_run
/// use doc_sanitizer::{sanitize_bytes, SanitizerConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("scan.png")?;
/// let report = sanitize_bytes(&bytes, "scan.png", &SanitizerConfig::default()).await?;
/// if let Some(record) = report.record() {
///     println!("{}", record.description);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn sanitize_bytes(
    bytes: &[u8],
    file_name: &str,
    config: &SanitizerConfig,
) -> Result<FileReport, SanitizeError> {
    let name = Path::new(file_name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "input".into());
    let dir = tempfile::tempdir().map_err(|e| SanitizeError::Internal(format!("tempdir: {e}")))?;
    let path = dir.path().join(&name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| SanitizeError::Internal(format!("tempfile write: {e}")))?;

    let mut report = sanitize_file(&path, config).await?;
    report.path = PathBuf::from(file_name);
    // `dir` is dropped (and the file deleted) here.
    Ok(report)
}

/// Write a batch result to `path`: JSON when the extension is `.json`,
/// otherwise the Markdown table.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_output(output: &BatchOutput, path: impl AsRef<Path>) -> Result<(), SanitizeError> {
    let path = path.as_ref();
    let write_err = |source: std::io::Error| SanitizeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let is_json = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let body = if is_json {
        serde_json::to_string_pretty(output)
            .map_err(|e| SanitizeError::Internal(format!("serialise output: {e}")))?
    } else {
        output.to_table()
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!("Wrote {} records to {}", output.stats.assembled_files, path.display());
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Regular, non-hidden files in `dir`, sorted by name.
pub(crate) async fn list_inputs(dir: &Path) -> Result<Vec<PathBuf>, SanitizeError> {
    let unreadable = |source: std::io::Error| SanitizeError::InputDirUnreadable {
        path: dir.to_path_buf(),
        source,
    };
    let meta = tokio::fs::metadata(dir).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SanitizeError::InputDirNotFound {
                path: dir.to_path_buf(),
            }
        } else {
            unreadable(e)
        }
    })?;
    if !meta.is_dir() {
        return Err(SanitizeError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().await.map_err(unreadable)?;
        if file_type.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();
    debug!("Found {} input files in {}", paths.len(), dir.display());
    Ok(paths)
}

/// Instantiate a named provider with the given model.
fn create_llm_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, SanitizeError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        SanitizeError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`, `config.model`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured only when both are set.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set, so a machine with several keys
///    defaults to OpenAI unless told otherwise.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &SanitizerConfig) -> Result<Arc<dyn LLMProvider>, SanitizeError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_llm_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_llm_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_llm_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| SanitizeError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, configure a provider, \
                or pass a ModelProvider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// The model provider for a pipeline: `config.model_provider` when set,
/// otherwise LLM-backed adapters over [`resolve_provider`].
pub fn resolve_model_provider(
    config: &SanitizerConfig,
) -> Result<Arc<dyn ModelProvider>, SanitizeError> {
    if let Some(ref provider) = config.model_provider {
        return Ok(Arc::clone(provider));
    }
    let llm = resolve_provider(config)?;
    Ok(Arc::new(LlmModelProvider::new(llm, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BatchStats;

    #[tokio::test]
    async fn missing_dir_is_fatal() {
        let err = list_inputs(Path::new("/definitely/not/here")).await.unwrap_err();
        assert!(matches!(err, SanitizeError::InputDirNotFound { .. }));
    }

    #[tokio::test]
    async fn file_instead_of_dir_is_fatal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = list_inputs(file.path()).await.unwrap_err();
        assert!(matches!(err, SanitizeError::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn lists_files_sorted_without_hidden_or_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.pptx", ".DS_Store", "c.docx"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let paths = list_inputs(dir.path()).await.unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.pptx", "b.png", "c.docx"]);
    }

    #[tokio::test]
    async fn write_output_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let output = BatchOutput {
            reports: vec![],
            stats: BatchStats::default(),
        };

        let md = dir.path().join("out/report.md");
        write_output(&output, &md).await.unwrap();
        let table = std::fs::read_to_string(&md).unwrap();
        assert!(table.starts_with("| File Name |"));

        let json = dir.path().join("report.json");
        write_output(&output, &json).await.unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(parsed["stats"]["total_files"], 0);
        assert!(!dir.path().join("report.json.tmp").exists());
    }
}

//! Input resolution: turn a path or image URL into a local file.
//!
//! Image inputs may be HTTP/HTTPS URLs. They are downloaded into a `TempDir`
//! that lives as long as the [`ResolvedInput`], so the file is removed once the
//! pipeline is done with it. The downloaded bytes must decode as PNG or JPEG.

use crate::error::CollaboratorError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    Local(PathBuf),
    /// The `TempDir` is kept alive until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to a local file, downloading it if it is a URL.
pub async fn resolve_input(
    input: &Path,
    timeout_secs: u64,
) -> Result<ResolvedInput, CollaboratorError> {
    let s = input.to_string_lossy();
    if is_url(&s) {
        download_image(&s, timeout_secs).await
    } else {
        Ok(ResolvedInput::Local(input.to_path_buf()))
    }
}

async fn download_image(url: &str, timeout_secs: u64) -> Result<ResolvedInput, CollaboratorError> {
    info!("Downloading image from: {}", url);
    let io_err = |detail: String| CollaboratorError::Io {
        path: PathBuf::from(url),
        detail,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| io_err(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            CollaboratorError::Timeout { secs: timeout_secs }
        } else {
            io_err(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(io_err(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| io_err(e.to_string()))?;
    let format = image::guess_format(&bytes)
        .map_err(|e| CollaboratorError::Format(format!("{url}: not an image ({e})")))?;
    if !matches!(format, image::ImageFormat::Png | image::ImageFormat::Jpeg) {
        return Err(CollaboratorError::Format(format!(
            "{url}: unsupported image format {format:?}"
        )));
    }

    let temp_dir = TempDir::new().map_err(|e| io_err(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url, format));
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| io_err(format!("Failed to write temp file: {e}")))?;

    debug!("Downloaded {} bytes to {}", bytes.len(), file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of `url`, or a name matching the sniffed format.
fn filename_from_url(url: &str, format: image::ImageFormat) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    match format {
        image::ImageFormat::Jpeg => "downloaded.jpg".to_string(),
        _ => "downloaded.png".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/logo.png"));
        assert!(is_url("http://example.com/logo.png"));
        assert!(!is_url("/tmp/logo.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_prefers_url_segment() {
        assert_eq!(
            filename_from_url("https://x.io/a/shot.jpeg?x=1", image::ImageFormat::Jpeg),
            "shot.jpeg"
        );
        assert_eq!(
            filename_from_url("https://x.io/render", image::ImageFormat::Png),
            "downloaded.png"
        );
    }

    #[tokio::test]
    async fn local_paths_pass_through() {
        let r = resolve_input(Path::new("/data/scan.png"), 5).await.unwrap();
        assert_eq!(r.path(), Path::new("/data/scan.png"));
    }
}

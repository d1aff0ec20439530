//! File-type routing by extension.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Office formats handled by the document driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Pptx,
    Xlsx,
}

/// Which extraction driver a file goes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Document(DocumentFormat),
    Image,
    Pdf,
    /// Carries the lowercased extension (empty when there is none).
    Unsupported(String),
}

impl FileKind {
    /// Classify by lowercased extension. URL query strings are ignored.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let ext = extension_of(path.as_ref());
        match ext.as_str() {
            "pptx" => FileKind::Document(DocumentFormat::Pptx),
            "xlsx" => FileKind::Document(DocumentFormat::Xlsx),
            "png" | "jpg" | "jpeg" => FileKind::Image,
            "pdf" => FileKind::Pdf,
            _ => FileKind::Unsupported(ext),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, FileKind::Unsupported(_))
    }

    /// Human label used in error descriptions ("Document", "Image", "PDF").
    pub fn label(&self) -> &'static str {
        match self {
            FileKind::Document(_) => "Document",
            FileKind::Image => "Image",
            FileKind::Pdf => "PDF",
            FileKind::Unsupported(_) => "Unsupported",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Document(DocumentFormat::Pptx) => f.write_str("pptx"),
            FileKind::Document(DocumentFormat::Xlsx) => f.write_str("xlsx"),
            FileKind::Image => f.write_str("image"),
            FileKind::Pdf => f.write_str("pdf"),
            FileKind::Unsupported(ext) => write!(f, "unsupported(.{ext})"),
        }
    }
}

/// Lowercased extension of a path or URL, without the dot.
pub fn extension_of(path: &Path) -> String {
    let name = path.to_string_lossy();
    let name = name.split(['?', '#']).next().unwrap_or_default();
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_known_extensions_case_insensitively() {
        assert_eq!(
            FileKind::from_path("deck.PPTX"),
            FileKind::Document(DocumentFormat::Pptx)
        );
        assert_eq!(
            FileKind::from_path("/data/q3.xlsx"),
            FileKind::Document(DocumentFormat::Xlsx)
        );
        assert_eq!(FileKind::from_path("scan.JPeG"), FileKind::Image);
        assert_eq!(FileKind::from_path("a/b/shot.png"), FileKind::Image);
        assert_eq!(FileKind::from_path("report.pdf"), FileKind::Pdf);
    }

    #[test]
    fn unknown_extensions_are_unsupported() {
        assert_eq!(
            FileKind::from_path("report.docx"),
            FileKind::Unsupported("docx".into())
        );
        assert_eq!(FileKind::from_path("README"), FileKind::Unsupported(String::new()));
        assert!(!FileKind::from_path("x.gif").is_supported());
    }

    #[test]
    fn url_query_is_ignored() {
        assert_eq!(
            FileKind::from_path("https://cdn.example.com/logo.png?v=3"),
            FileKind::Image
        );
    }
}

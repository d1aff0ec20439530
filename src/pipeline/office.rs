//! Default text extractor for slide decks and spreadsheets.
//!
//! - **pptx**: slides are read from the zip container in slide-number order;
//!   every text shape (`p:sp`) yields one fragment, its paragraphs joined by
//!   newlines. Tables and charts are not text shapes and are skipped.
//! - **xlsx**: every non-empty cell of every sheet, row by row, via `calamine`.
//!
//! Both parsers are synchronous and run inside `spawn_blocking`.

use crate::collaborators::DocumentTextExtractor;
use crate::error::CollaboratorError;
use crate::pipeline::route::{DocumentFormat, FileKind};
use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader as _};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extracts text fragments from `.pptx` and `.xlsx` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfficeExtractor;

#[async_trait]
impl DocumentTextExtractor for OfficeExtractor {
    async fn extract_text(&self, path: &Path) -> Result<Vec<String>, CollaboratorError> {
        let format = match FileKind::from_path(path) {
            FileKind::Document(f) => f,
            other => {
                return Err(CollaboratorError::Format(format!(
                    "not a slide deck or spreadsheet: {other}"
                )))
            }
        };
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || match format {
            DocumentFormat::Pptx => pptx_fragments(&path),
            DocumentFormat::Xlsx => xlsx_fragments(&path),
        })
        .await
        .map_err(|e| CollaboratorError::Model(format!("extraction task panicked: {e}")))?
    }
}

fn io_error(path: &Path, detail: impl ToString) -> CollaboratorError {
    CollaboratorError::Io {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Text of every text shape in every slide, in slide order.
pub fn pptx_fragments(path: &Path) -> Result<Vec<String>, CollaboratorError> {
    let file = std::fs::File::open(path).map_err(|e| io_error(path, e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| CollaboratorError::Format(format!("{}: {e}", path.display())))?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|n| (n, name.to_string())))
        .collect();
    slides.sort();
    debug!("{}: {} slides", path.display(), slides.len());

    let mut fragments = Vec::new();
    for (_, name) in slides {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|e| CollaboratorError::Format(format!("{name}: {e}")))?
            .read_to_string(&mut xml)
            .map_err(|e| io_error(&PathBuf::from(&name), e))?;
        fragments.extend(slide_shape_texts(&xml)?);
    }
    Ok(fragments)
}

/// `ppt/slides/slide12.xml` → 12.
fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// Text of each `p:sp` shape in one slide's XML.
pub fn slide_shape_texts(xml: &str) -> Result<Vec<String>, CollaboratorError> {
    let mut reader = Reader::from_str(xml);
    let mut shapes = Vec::new();
    let mut shape_depth = 0usize;
    let mut in_text = false;
    let mut paragraphs: Vec<String> = Vec::new();
    let mut paragraph = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"p:sp" => shape_depth += 1,
                b"a:p" => paragraph.clear(),
                b"a:t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"a:br" => paragraph.push('\n'),
            Ok(Event::Text(t)) if in_text && shape_depth > 0 => {
                let text = t
                    .unescape()
                    .map_err(|e| CollaboratorError::Format(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"a:t" => in_text = false,
                b"a:p" if shape_depth > 0 => paragraphs.push(std::mem::take(&mut paragraph)),
                b"p:sp" => {
                    shape_depth = shape_depth.saturating_sub(1);
                    let text = paragraphs.join("\n");
                    paragraphs.clear();
                    if !text.trim().is_empty() {
                        shapes.push(text);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(CollaboratorError::Format(e.to_string())),
            _ => {}
        }
    }
    Ok(shapes)
}

/// Every non-empty cell of every sheet, row-major.
pub fn xlsx_fragments(path: &Path) -> Result<Vec<String>, CollaboratorError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| CollaboratorError::Format(format!("{}: {e}", path.display())))?;

    let mut fragments = Vec::new();
    for sheet in workbook.sheet_names().to_owned() {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| CollaboratorError::Format(format!("sheet '{sheet}': {e}")))?;
        let before = fragments.len();
        for row in range.rows() {
            for cell in row {
                match cell {
                    Data::Empty => {}
                    Data::String(s) if s.trim().is_empty() => {}
                    other => fragments.push(other.to_string()),
                }
            }
        }
        debug!("Sheet '{}': {} cells", sheet, fragments.len() - before);
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SLIDE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main">
  <p:cSld><p:spTree>
    <p:sp><p:txBody>
      <a:p><a:r><a:t>Quarterly </a:t></a:r><a:r><a:t>Review</a:t></a:r></a:p>
    </p:txBody></p:sp>
    <p:sp><p:txBody>
      <a:p><a:r><a:t>Owner: Jane &amp; Co</a:t></a:r></a:p>
      <a:p><a:r><a:t>jane@example.com</a:t></a:r></a:p>
    </p:txBody></p:sp>
    <p:sp><p:txBody><a:p></a:p></p:txBody></p:sp>
  </p:spTree></p:cSld>
</p:sld>"#;

    fn slide_xml(text: &str) -> String {
        format!(
            r#"<p:sld xmlns:a="a" xmlns:p="p"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{text}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
        )
    }

    #[test]
    fn shapes_become_fragments() {
        let texts = slide_shape_texts(SLIDE).unwrap();
        assert_eq!(
            texts,
            vec![
                "Quarterly Review".to_string(),
                "Owner: Jane & Co\njane@example.com".to_string()
            ]
        );
    }

    #[test]
    fn slide_numbers_parse() {
        assert_eq!(slide_number("ppt/slides/slide3.xml"), Some(3));
        assert_eq!(slide_number("ppt/slides/_rels/slide3.xml.rels"), None);
        assert_eq!(slide_number("ppt/slideLayouts/slideLayout1.xml"), None);
    }

    #[tokio::test]
    async fn pptx_slides_are_read_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pptx");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let opts = zip::write::SimpleFileOptions::default();
            for (name, text) in [
                ("ppt/slides/slide10.xml", "ten"),
                ("ppt/slides/slide2.xml", "two"),
                ("ppt/slides/slide1.xml", "one"),
            ] {
                zip.start_file(name, opts).unwrap();
                zip.write_all(slide_xml(text).as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        let fragments = OfficeExtractor.extract_text(&path).await.unwrap();
        assert_eq!(fragments, vec!["one", "two", "ten"]);
    }

    #[tokio::test]
    async fn rejects_non_office_paths() {
        let err = OfficeExtractor
            .extract_text(Path::new("photo.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Format(_)));
    }

    #[tokio::test]
    async fn corrupt_archive_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(OfficeExtractor.extract_text(&path).await.is_err());
    }
}

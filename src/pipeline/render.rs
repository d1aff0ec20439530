//! PDF rasterisation via pdfium.
//!
//! `pdfium-render` wraps a C++ library that is not async-safe, so rendering
//! runs on `spawn_blocking`. `max_rendered_pixels` caps the longest edge of
//! every page regardless of its physical size.

use crate::collaborators::PdfRasteriser;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use image::RgbImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Renders every page of a PDF with pdfium.
///
/// The library is looked up in `PDFIUM_LIBRARY_PATH` (file or directory),
/// then next to the working directory, then on the system search path.
#[derive(Debug, Clone)]
pub struct PdfiumRasteriser {
    max_pixels: u32,
}

impl PdfiumRasteriser {
    pub fn new(max_pixels: u32) -> Self {
        Self { max_pixels }
    }
}

impl Default for PdfiumRasteriser {
    fn default() -> Self {
        Self::new(2000)
    }
}

#[async_trait]
impl PdfRasteriser for PdfiumRasteriser {
    async fn rasterise(&self, path: &Path) -> Result<Vec<RgbImage>, CollaboratorError> {
        let path = path.to_path_buf();
        let max_pixels = self.max_pixels;
        tokio::task::spawn_blocking(move || render_all_blocking(&path, max_pixels))
            .await
            .map_err(|e| CollaboratorError::Model(format!("Render task panicked: {e}")))?
    }
}

fn load_pdfium() -> Result<Pdfium, CollaboratorError> {
    let unavailable = |e: PdfiumError| CollaboratorError::Unavailable(format!("pdfium: {e:?}"));

    if let Some(value) = std::env::var_os("PDFIUM_LIBRARY_PATH") {
        let path = PathBuf::from(value);
        let lib = if path.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        } else {
            path
        };
        return Pdfium::bind_to_library(lib)
            .map(Pdfium::new)
            .map_err(unavailable);
    }

    match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")) {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(primary) => Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|_| unavailable(primary)),
    }
}

fn render_all_blocking(pdf_path: &Path, max_pixels: u32) -> Result<Vec<RgbImage>, CollaboratorError> {
    let pdfium = load_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| CollaboratorError::Io {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| CollaboratorError::Format(format!("page {}: {e:?}", idx + 1)))?;
        let image = bitmap.as_image().to_rgb8();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }
    Ok(images)
}

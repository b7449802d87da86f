//! Page rasterization: first PDF page or a single photo → one RGB bitmap.
//!
//! The bitmap is the single source of pixel coordinates for every later step.
//! Rendering never depends on an OCR engine being installed.

use image::RgbImage;
use pdfium_render::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::pipeline::InputError;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("no document bytes supplied")]
    Empty,

    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("PDF renderer unavailable: {0}")]
    PdfUnavailable(String),

    #[error("failed to load PDF: {0}")]
    PdfLoad(String),

    #[error("PDF has no pages")]
    EmptyPdf,

    #[error("failed to render first page: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Image,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Uploaded document bytes plus their detected kind.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl DocumentInput {
    pub fn pdf(bytes: Vec<u8>) -> Self {
        Self { kind: DocumentKind::Pdf, bytes }
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Self { kind: DocumentKind::Image, bytes }
    }

    /// Decide the kind from magic bytes first, then the file name.
    pub fn sniff(name: Option<&str>, bytes: Vec<u8>) -> Result<Self, InputError> {
        if bytes.is_empty() {
            return Err(InputError::Empty);
        }
        if is_pdf_bytes(&bytes) || name.map(Path::new).is_some_and(is_pdf_path) {
            return Ok(Self::pdf(bytes));
        }
        if image::guess_format(&bytes).is_ok() || name.map(Path::new).is_some_and(is_image_path) {
            return Ok(Self::image(bytes));
        }
        Err(InputError::UnsupportedType(
            name.unwrap_or("<unnamed upload>").to_string(),
        ))
    }
}

/// Renders the first page of a PDF.
pub trait PdfRenderer: Send + Sync {
    fn render_first_page(&self, bytes: &[u8], dpi: u32) -> Result<RgbImage, RasterError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// PDFium-backed renderer.  The library is bound per call so the renderer
/// itself stays `Send + Sync` and cheap to construct.
pub struct PdfiumRenderer {
    pub library_dir: Option<PathBuf>,
    pub max_dimension: u32,
}

impl PdfiumRenderer {
    pub fn new(library_dir: Option<PathBuf>, max_dimension: u32) -> Self {
        Self {
            library_dir,
            max_dimension,
        }
    }

    fn bind(&self) -> Result<Pdfium, RasterError> {
        let configured = self
            .library_dir
            .as_ref()
            .map(|dir| dir.to_string_lossy().into_owned())
            .map(|dir| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)));

        let bindings = match configured {
            Some(Ok(b)) => b,
            _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("/usr/lib")))
                .or_else(|_| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("/usr/local/lib")))
                .or_else(|_| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("/opt/homebrew/lib")))
                .or_else(|_| Pdfium::bind_to_system_library())
                .map_err(|e| RasterError::PdfUnavailable(format!("could not find PDFium library: {e}")))?,
        };

        Ok(Pdfium::new(bindings))
    }

    /// Target pixel size for a page of `width_pt`×`height_pt` points.
    fn target_size(&self, width_pt: f32, height_pt: f32, dpi: u32) -> (u32, u32) {
        let scale = dpi as f32 / 72.0;
        let mut width_px = (width_pt * scale) as u32;
        let mut height_px = (height_pt * scale) as u32;

        if width_px > self.max_dimension || height_px > self.max_dimension {
            let ratio = self.max_dimension as f32 / width_px.max(height_px) as f32;
            width_px = (width_px as f32 * ratio) as u32;
            height_px = (height_px as f32 * ratio) as u32;
        }
        (width_px.max(1), height_px.max(1))
    }
}

impl PdfRenderer for PdfiumRenderer {
    fn render_first_page(&self, bytes: &[u8], dpi: u32) -> Result<RgbImage, RasterError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| RasterError::PdfLoad(e.to_string()))?;

        let pages = document.pages();
        if pages.len() == 0 {
            return Err(RasterError::EmptyPdf);
        }
        let page = pages.get(0).map_err(|e| RasterError::Render(e.to_string()))?;

        let (width_px, height_px) = self.target_size(page.width().value, page.height().value, dpi);
        debug!(width_px, height_px, dpi, "rendering first pdf page");

        let render_config = PdfRenderConfig::new()
            .set_target_width(width_px as i32)
            .set_target_height(height_px as i32)
            .render_form_data(true)
            .render_annotations(true);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RasterError::Render(e.to_string()))?;

        Ok(bitmap.as_image().to_rgb8())
    }

    fn is_available(&self) -> bool {
        self.bind().is_ok()
    }
}

/// Renderer for environments without PDFium: every PDF fails to rasterize.
pub struct NoPdfRenderer;

impl PdfRenderer for NoPdfRenderer {
    fn render_first_page(&self, _bytes: &[u8], _dpi: u32) -> Result<RgbImage, RasterError> {
        Err(RasterError::PdfUnavailable("no PDF renderer configured".into()))
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Produce the normalized page bitmap for one request.
///
/// Images are decoded at their native size; `dpi` only applies to PDFs.
pub fn rasterize(
    input: &DocumentInput,
    dpi: u32,
    pdf: &dyn PdfRenderer,
) -> Result<RgbImage, RasterError> {
    if input.bytes.is_empty() {
        return Err(RasterError::Empty);
    }
    match input.kind {
        DocumentKind::Image => Ok(image::load_from_memory(&input.bytes)?.to_rgb8()),
        DocumentKind::Pdf => pdf.render_first_page(&input.bytes, dpi),
    }
}

/// Check if bytes represent a PDF file (magic bytes: %PDF)
pub fn is_pdf_bytes(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[0..4] == b"%PDF"
}

/// Check if a file path has a PDF extension
pub fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

//! PDF rasterization and text search.
//!
//! The pipeline only sees the [`PageRasterizer`] / [`RasterDocument`] /
//! [`PdfTextSearch`] traits. [`PdfiumRasterizer`] is the production
//! implementation.

use std::path::Path;

use pdfium_render::prelude::*;
use tracing::{debug, info};

use crate::config::RenderConfig;
use crate::error::ProcessingError;

use super::RasterPage;
use super::geometry::Rectangle;

/// Vector-space text search on an open document.
pub trait PdfTextSearch {
    /// Every occurrence of `query` on page `index` (0-based), as top-left
    /// origin rectangles in PDF points.
    fn search_text(&self, index: u16, query: &str) -> Result<Vec<Rectangle>, ProcessingError>;
}

/// An open document that can be rendered page by page.
pub trait RasterDocument: PdfTextSearch {
    fn page_count(&self) -> u16;

    fn render_page(&self, index: u16) -> Result<RasterPage, ProcessingError>;
}

/// Opens documents for rendering.
pub trait PageRasterizer {
    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn RasterDocument + 'a>, ProcessingError>;
}

/// Create a new Pdfium instance (dynamically linked).
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
pub fn create_pdfium() -> Result<Pdfium, ProcessingError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ProcessingError::Pdfium {
            message: format!("{:?}. Install libpdfium or place it in ./vendor/pdfium/lib/", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// pdfium-backed rasterizer. The library is bound once and shared by every
/// document it opens.
pub struct PdfiumRasterizer {
    pdfium: Pdfium,
    dpi: f64,
}

impl PdfiumRasterizer {
    pub fn new(config: &RenderConfig) -> Result<Self, ProcessingError> {
        let pdfium = create_pdfium()?;
        info!(dpi = config.dpi, "PDFium bound");
        Ok(Self {
            pdfium,
            dpi: config.dpi,
        })
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn RasterDocument + 'a>, ProcessingError> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| ProcessingError::PdfLoad {
                path: path.to_path_buf(),
                source: Box::new(std::io::Error::other(e.to_string())),
            })?;

        Ok(Box::new(PdfiumDocument {
            document,
            dpi: self.dpi,
        }))
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
    dpi: f64,
}

impl PdfiumDocument<'_> {
    fn page(&self, index: u16) -> Result<PdfPage<'_>, Box<dyn std::error::Error + Send + Sync>> {
        self.document
            .pages()
            .get(index)
            .map_err(|e| format!("Failed to get page: {}", e).into())
    }
}

impl RasterDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> u16 {
        self.document.pages().len()
    }

    fn render_page(&self, index: u16) -> Result<RasterPage, ProcessingError> {
        let rasterize_error =
            |source: Box<dyn std::error::Error + Send + Sync>| ProcessingError::Rasterize {
                page: u32::from(index) + 1,
                source,
            };

        let page = self.page(index).map_err(rasterize_error)?;
        let vector_width = f64::from(page.width().value);
        let vector_height = f64::from(page.height().value);

        let pixels_per_point = self.dpi / 72.0;
        let target_width = (vector_width * pixels_per_point).round() as i32;
        let target_height = (vector_height * pixels_per_point).round() as i32;

        let config = PdfRenderConfig::new()
            .set_target_width(target_width)
            .set_target_height(target_height);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| rasterize_error(format!("Failed to render page: {}", e).into()))?;

        let image = bitmap.as_image().to_rgb8();
        debug!(
            page = index + 1,
            width = image.width(),
            height = image.height(),
            "Rendered page"
        );

        Ok(RasterPage {
            image,
            vector_width,
            vector_height,
        })
    }
}

impl PdfTextSearch for PdfiumDocument<'_> {
    fn search_text(&self, index: u16, query: &str) -> Result<Vec<Rectangle>, ProcessingError> {
        let search_error = |message: String| ProcessingError::TextSearch {
            page: u32::from(index) + 1,
            source: Box::new(std::io::Error::other(message)),
        };

        let page = self.page(index).map_err(|e| search_error(e.to_string()))?;
        let page_height = f64::from(page.height().value);
        let text = page
            .text()
            .map_err(|e| search_error(format!("Failed to get page text: {}", e)))?;
        let search = text
            .search(query, &PdfSearchOptions::new())
            .map_err(|e| search_error(format!("Failed to search page text: {}", e)))?;

        let mut hits = Vec::new();
        for segments in search.iter(PdfSearchDirection::SearchForward) {
            // One occurrence can span several segments (line wraps, font runs)
            let occurrence = segments
                .iter()
                .map(|segment| pdf_rect_to_rectangle(&segment.bounds()))
                .reduce(|a, b| a.union(&b));

            if let Some(rect) = occurrence {
                hits.push(flip_to_top_left(&rect, page_height));
            }
        }

        Ok(hits)
    }
}

/// Convert a pdfium rect to a bottom-left origin rectangle.
fn pdf_rect_to_rectangle(r: &PdfRect) -> Rectangle {
    Rectangle {
        x1: r.left().value as f64,
        y1: r.bottom().value as f64,
        x2: r.right().value as f64,
        y2: r.top().value as f64,
    }
}

/// Flip a bottom-left origin rectangle into the top-left origin used by
/// raster images.
fn flip_to_top_left(rect: &Rectangle, page_height: f64) -> Rectangle {
    Rectangle {
        x1: rect.x1,
        y1: page_height - rect.y2,
        x2: rect.x2,
        y2: page_height - rect.y1,
    }
}

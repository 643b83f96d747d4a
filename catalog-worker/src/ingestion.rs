//! Catalog ingestion.
//!
//! PDFs go through the per-page extraction pipeline ([`pipeline`]) in one of
//! two modes chosen at intake ([`job`]). Supplier spreadsheets are normalized
//! into line items ([`spreadsheet`]).

pub mod detection;
pub mod extraction;
pub mod geometry;
pub mod job;
pub mod manifest;
pub mod matching;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod reconcile;
pub mod spreadsheet;

use std::path::Path;

use image::RgbImage;

pub use pipeline::CatalogPipeline;

/// A rendered page plus the vector size it was rendered from.
#[derive(Debug, Clone)]
pub struct RasterPage {
    pub image: RgbImage,
    /// Page width in PDF points
    pub vector_width: f64,
    /// Page height in PDF points
    pub vector_height: f64,
}

/// Move a file, replacing anything at `dest`. Falls back to copy + delete
/// when a rename is impossible (e.g., across filesystems).
pub fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    if dest.exists() {
        std::fs::remove_file(dest)?;
    }
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dest)?;
    std::fs::remove_file(src)
}

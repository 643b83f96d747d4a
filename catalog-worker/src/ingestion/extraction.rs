//! Padding, clamping, cropping and persisting product regions.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{ImageEncoder, RgbImage};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ExtractionConfig, StorageLayout};
use crate::error::{ProcessingError, WorkerResult};

use super::geometry::PixelBox;

/// A persisted crop.
#[derive(Debug, Clone)]
pub struct ExtractedRegion {
    pub uuid: Uuid,
    pub path: PathBuf,
    /// Final box after padding and clamping
    pub bounds: PixelBox,
    pub crop: RgbImage,
}

/// Full-page raster persisted once per page.
#[derive(Debug, Clone)]
pub struct SavedPage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

pub struct RegionExtractor {
    pad_horizontal: f64,
    pad_top: f64,
    pad_bottom: f64,
    jpeg_quality: u8,
    images_dir: PathBuf,
    pages_dir: PathBuf,
}

impl RegionExtractor {
    pub fn new(config: &ExtractionConfig, layout: &StorageLayout) -> Self {
        Self {
            pad_horizontal: config.pad_horizontal,
            pad_top: config.pad_top,
            pad_bottom: config.pad_bottom,
            jpeg_quality: config.jpeg_quality,
            images_dir: layout.images_dir(),
            pages_dir: layout.pages_dir(),
        }
    }

    /// Grow `bounds` by the configured fractions of its own size, truncate
    /// toward zero and clamp to the page.
    ///
    /// The bottom margin is larger to take in the caption under a product
    /// photo.
    pub fn padded_box(&self, bounds: PixelBox, page_width: u32, page_height: u32) -> PixelBox {
        let pad_w = bounds.width() as f64 * self.pad_horizontal;
        let pad_top = bounds.height() as f64 * self.pad_top;
        let pad_bottom = bounds.height() as f64 * self.pad_bottom;

        PixelBox::new(
            (bounds.x1 as f64 - pad_w) as i64,
            (bounds.y1 as f64 - pad_top) as i64,
            (bounds.x2 as f64 + pad_w) as i64,
            (bounds.y2 as f64 + pad_bottom) as i64,
        )
        .clamp_to(page_width, page_height)
    }

    /// Pad, crop and save one region as `images/<uuid>.jpg`.
    ///
    /// Returns `None` when the clamped box has no area.
    pub fn extract(
        &self,
        page: &RgbImage,
        bounds: PixelBox,
    ) -> WorkerResult<Option<ExtractedRegion>> {
        let padded = self.padded_box(bounds, page.width(), page.height());
        if padded.is_empty() {
            warn!(?bounds, ?padded, "Skipping region with empty crop");
            return Ok(None);
        }

        // clamp_to guarantees non-negative coordinates within the page
        let crop = image::imageops::crop_imm(
            page,
            padded.x1 as u32,
            padded.y1 as u32,
            padded.width() as u32,
            padded.height() as u32,
        )
        .to_image();

        let uuid = Uuid::new_v4();
        let path = self.images_dir.join(format!("{}.jpg", uuid));
        write_jpeg(&path, &crop, self.jpeg_quality)?;
        debug!(path = %path.display(), ?padded, "Saved region crop");

        Ok(Some(ExtractedRegion {
            uuid,
            path,
            bounds: padded,
            crop,
        }))
    }

    /// Save a full-page raster as `pages/<uuid>.jpg`.
    pub fn save_page(&self, page: &RgbImage) -> WorkerResult<SavedPage> {
        let path = self.pages_dir.join(format!("{}.jpg", Uuid::new_v4()));
        write_jpeg(&path, page, self.jpeg_quality)?;
        Ok(SavedPage {
            path,
            width: page.width(),
            height: page.height(),
        })
    }
}

/// Encode an RGB image as JPEG, removing the partial file on failure.
fn write_jpeg(path: &Path, image: &RgbImage, quality: u8) -> Result<(), ProcessingError> {
    let file = File::create(path).map_err(|e| ProcessingError::io(path, e))?;

    let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
    if let Err(e) = encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    ) {
        let _ = std::fs::remove_file(path);
        return Err(ProcessingError::ImageEncode {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn extractor(tmp: &TempDir) -> RegionExtractor {
        let layout = StorageLayout::new(tmp.path());
        layout.ensure_dirs().unwrap();
        RegionExtractor::new(&ExtractionConfig::default(), &layout)
    }

    #[test]
    fn test_padding_clamps_at_origin() {
        let tmp = TempDir::new().unwrap();
        let padded = extractor(&tmp).padded_box(PixelBox::new(0, 0, 10, 10), 100, 100);
        assert_eq!(padded, PixelBox::new(0, 0, 10, 12));
    }

    #[test]
    fn test_padding_is_asymmetric() {
        let tmp = TempDir::new().unwrap();
        let padded = extractor(&tmp).padded_box(PixelBox::new(100, 100, 200, 200), 1000, 1000);
        assert_eq!(padded, PixelBox::new(95, 95, 205, 220));
    }

    #[test]
    fn test_padding_clamps_at_far_edges() {
        let tmp = TempDir::new().unwrap();
        let padded = extractor(&tmp).padded_box(PixelBox::new(50, 50, 100, 100), 100, 100);
        assert_eq!(padded, PixelBox::new(47, 47, 100, 100));
    }

    #[test]
    fn test_extract_writes_crop_with_final_box() {
        let tmp = TempDir::new().unwrap();
        let extractor = extractor(&tmp);
        let page = RgbImage::from_pixel(300, 300, Rgb([200, 10, 10]));

        let region = extractor
            .extract(&page, PixelBox::new(100, 100, 200, 200))
            .unwrap()
            .expect("region should be extracted");

        assert_eq!(region.bounds, PixelBox::new(95, 95, 205, 220));
        assert_eq!(region.crop.dimensions(), (110, 125));
        assert!(region.path.starts_with(tmp.path().join("processed/images")));
        assert_eq!(
            region.path.file_name().unwrap().to_string_lossy(),
            format!("{}.jpg", region.uuid)
        );

        let saved = image::open(&region.path).unwrap();
        assert_eq!((saved.width(), saved.height()), (110, 125));
    }

    #[test]
    fn test_extract_skips_region_outside_page() {
        let tmp = TempDir::new().unwrap();
        let extractor = extractor(&tmp);
        let page = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));

        let region = extractor
            .extract(&page, PixelBox::new(150, 150, 200, 200))
            .unwrap();
        assert!(region.is_none());
    }

    #[test]
    fn test_save_page() {
        let tmp = TempDir::new().unwrap();
        let extractor = extractor(&tmp);
        let page = RgbImage::from_pixel(64, 48, Rgb([255, 255, 255]));

        let saved = extractor.save_page(&page).unwrap();
        assert_eq!((saved.width, saved.height), (64, 48));
        assert!(saved.path.starts_with(tmp.path().join("processed/pages")));
        assert!(saved.path.exists());
    }
}

//! Auto mode: OCR over extracted crops and SKU token guessing.

use std::cell::RefCell;
use std::sync::LazyLock;

use image::RgbImage;
use leptess::LepTess;
use regex::Regex;
use tracing::{debug, info};

use crate::config::OcrConfig;
use crate::error::OcrError;

/// 5 to 12 uppercase letters, digits or hyphens between word boundaries
static SKU_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z0-9-]{5,12}\b").expect("SKU pattern is valid"));

/// Text recognition engine.
pub trait OcrEngine {
    fn recognize(&self, image: &RgbImage) -> Result<String, OcrError>;
}

/// Tesseract through leptess. One engine instance is reused for every crop.
pub struct TesseractOcr {
    // LepTess needs &mut for every call; the worker uses it from one thread
    engine: RefCell<LepTess>,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let engine = LepTess::new(None, &config.language).map_err(|e| OcrError::Init {
            language: config.language.clone(),
            message: format!(
                "{}. Make sure the Tesseract language data is installed",
                e
            ),
        })?;
        info!(language = %config.language, "Tesseract initialized");

        Ok(Self {
            engine: RefCell::new(engine),
        })
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &RgbImage) -> Result<String, OcrError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(String::new());
        }

        // leptess wants an encoded image
        let mut png_buf = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut png_buf, image::ImageFormat::Png)
            .map_err(|e| OcrError::Recognition {
                message: format!("Failed to encode image to PNG: {}", e),
            })?;

        let mut engine = self.engine.borrow_mut();
        engine
            .set_image_from_mem(png_buf.get_ref())
            .map_err(|e| OcrError::Recognition {
                message: format!("Failed to set image from memory: {}", e),
            })?;

        let text = engine.get_utf8_text().map_err(|e| OcrError::Recognition {
            message: e.to_string(),
        })?;
        Ok(text.trim().to_string())
    }
}

/// OCR result for one crop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSku {
    /// Raw recognized text, always kept
    pub detected_text: String,
    /// First SKU-looking token, empty when none
    pub detected_sku: String,
}

pub struct AutoSkuExtractor {
    ocr: Box<dyn OcrEngine>,
}

impl AutoSkuExtractor {
    pub fn new(ocr: Box<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    pub fn extract(&self, crop: &RgbImage) -> Result<AutoSku, OcrError> {
        let detected_text = self.ocr.recognize(crop)?;
        let detected_sku = guess_sku(&detected_text).unwrap_or_default().to_string();
        debug!(sku = %detected_sku, chars = detected_text.len(), "OCR on crop");

        Ok(AutoSku {
            detected_text,
            detected_sku,
        })
    }
}

/// First token in `text` that looks like a SKU.
pub fn guess_sku(text: &str) -> Option<&str> {
    SKU_PATTERN.find(text).map(|m| m.as_str())
}

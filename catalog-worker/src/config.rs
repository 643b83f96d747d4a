//! Worker configuration loaded from an optional config file and `CATALOG__*`
//! environment variables.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProcessingError, WorkerError, WorkerResult};

/// Top-level worker configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub ocr: OcrConfig,
}

/// Storage configuration. Every directory the worker touches is derived from
/// `root_dir`.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
        }
    }
}

/// Intake watcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Quiet period after the last event for a file before it is processed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Enqueue files already sitting in the intake directory at startup
    #[serde(default)]
    pub scan_on_startup: bool,
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            scan_on_startup: false,
        }
    }
}

/// Visual region detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Path to the YOLOv8 ONNX model
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Square input edge the model was exported with
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Learned detections must score strictly above this
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// IoU above which the learned detector suppresses same-class boxes
    #[serde(default = "default_nms_iou_threshold")]
    pub nms_iou_threshold: f32,

    /// Contour boxes overlapping any learned box above this IoU are dropped
    #[serde(default = "default_merge_iou_threshold")]
    pub merge_iou_threshold: f64,

    /// Contours must enclose strictly more than this many square pixels
    #[serde(default = "default_contour_min_area")]
    pub contour_min_area: f64,

    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,

    #[serde(default = "default_canny_low")]
    pub canny_low: f32,

    #[serde(default = "default_canny_high")]
    pub canny_high: f32,

    #[serde(default = "default_dilate_iterations")]
    pub dilate_iterations: u8,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            input_size: default_input_size(),
            confidence_threshold: default_confidence_threshold(),
            nms_iou_threshold: default_nms_iou_threshold(),
            merge_iou_threshold: default_merge_iou_threshold(),
            contour_min_area: default_contour_min_area(),
            blur_sigma: default_blur_sigma(),
            canny_low: default_canny_low(),
            canny_high: default_canny_high(),
            dilate_iterations: default_dilate_iterations(),
        }
    }
}

/// Targeted matching configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// A text hit matches a region only when closer than this fraction of the
    /// page height
    #[serde(default = "default_max_distance_ratio")]
    pub max_distance_ratio: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_distance_ratio: default_max_distance_ratio(),
        }
    }
}

/// Crop padding and encoding configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Fraction of box width added left and right
    #[serde(default = "default_pad_horizontal")]
    pub pad_horizontal: f64,

    /// Fraction of box height added above
    #[serde(default = "default_pad_top")]
    pub pad_top: f64,

    /// Fraction of box height added below (room for the product caption)
    #[serde(default = "default_pad_bottom")]
    pub pad_bottom: f64,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pad_horizontal: default_pad_horizontal(),
            pad_top: default_pad_top(),
            pad_bottom: default_pad_bottom(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Page rasterization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_dpi")]
    pub dpi: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { dpi: default_dpi() }
    }
}

/// OCR engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// Tesseract language codes (e.g., "eng", "eng+deu")
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
        }
    }
}

// ==================== Directory Layout ====================

/// Fixed directory tree below the configured root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watched for new files
    pub fn intake_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    /// Quarantine for sources whose job failed
    pub fn failed_dir(&self) -> PathBuf {
        self.intake_dir().join("failed")
    }

    /// Manifests, progress files and relocated sources
    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    /// Per-region crops
    pub fn images_dir(&self) -> PathBuf {
        self.processed_dir().join("images")
    }

    /// Full-page rasters
    pub fn pages_dir(&self) -> PathBuf {
        self.processed_dir().join("pages")
    }

    /// Normalized spreadsheet line items
    pub fn orders_dir(&self) -> PathBuf {
        self.processed_dir().join("orders")
    }

    /// Create every directory of the layout.
    pub fn ensure_dirs(&self) -> WorkerResult<()> {
        for dir in [
            self.intake_dir(),
            self.failed_dir(),
            self.processed_dir(),
            self.images_dir(),
            self.pages_dir(),
            self.orders_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| ProcessingError::io(&dir, e))?;
        }
        Ok(())
    }
}

impl From<&StorageConfig> for StorageLayout {
    fn from(config: &StorageConfig) -> Self {
        StorageLayout::new(&config.root_dir)
    }
}

/// Load configuration from file and env vars
pub fn load_config() -> WorkerResult<WorkerConfig> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("CATALOG")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| WorkerError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| WorkerError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })
}

// ==================== Default Value Functions ====================

fn default_root_dir() -> PathBuf {
    PathBuf::from("./shared")
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_model_path() -> PathBuf {
    PathBuf::from("yolov8n.onnx")
}

fn default_input_size() -> u32 {
    640
}

fn default_confidence_threshold() -> f32 {
    0.4
}

fn default_nms_iou_threshold() -> f32 {
    0.45
}

fn default_merge_iou_threshold() -> f64 {
    0.3
}

fn default_contour_min_area() -> f64 {
    500.0
}

// Sigma OpenCV derives for a 5x5 Gaussian kernel with sigma = 0
fn default_blur_sigma() -> f32 {
    1.1
}

fn default_canny_low() -> f32 {
    50.0
}

fn default_canny_high() -> f32 {
    150.0
}

fn default_dilate_iterations() -> u8 {
    2
}

fn default_max_distance_ratio() -> f64 {
    0.2
}

fn default_pad_horizontal() -> f64 {
    0.05
}

fn default_pad_top() -> f64 {
    0.05
}

fn default_pad_bottom() -> f64 {
    0.20
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_dpi() -> f64 {
    200.0
}

fn default_language() -> String {
    "eng".to_string()
}

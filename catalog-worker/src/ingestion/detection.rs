//! Hybrid visual region detection.
//!
//! Candidate product regions come from two sources:
//! - a learned object detector (YOLOv8 via ONNX Runtime), trusted unconditionally
//! - a geometric edge/contour detector, used to recover regions the learned
//!   detector missed
//!
//! Contour boxes that substantially overlap a learned box are treated as
//! duplicates and dropped.

pub mod contour;
pub mod yolo;

use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use crate::config::DetectionConfig;
use crate::error::{DetectionError, WorkerResult};

use super::geometry::PixelBox;

pub use contour::ContourDetector;
pub use yolo::YoloDetector;

/// A box proposed by the learned detector, in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

/// Learned object detector.
///
/// Implementations are loaded once at startup and treated as stateless
/// request/response services.
pub trait ObjectDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<ScoredBox>, DetectionError>;
}

/// Which detector proposed a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionSource {
    Learned,
    Contour,
}

/// A detector-proposed rectangle on a page, not yet confirmed as a product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateRegion {
    pub bounds: PixelBox,
    pub source: RegionSource,
}

/// Merges learned and contour detections into one deduplicated candidate set.
pub struct VisualRegionDetector {
    learned: Box<dyn ObjectDetector>,
    contour: ContourDetector,
    confidence_threshold: f32,
    merge_iou_threshold: f64,
}

impl VisualRegionDetector {
    pub fn new(learned: Box<dyn ObjectDetector>, config: &DetectionConfig) -> Self {
        Self {
            learned,
            contour: ContourDetector::new(config),
            confidence_threshold: config.confidence_threshold,
            merge_iou_threshold: config.merge_iou_threshold,
        }
    }

    /// Detect candidate regions on a rasterized page.
    ///
    /// Learned boxes come first, followed by the surviving contour boxes.
    pub fn detect(&self, page: &RgbImage) -> WorkerResult<Vec<CandidateRegion>> {
        let learned: Vec<PixelBox> = self
            .learned
            .detect(page)?
            .into_iter()
            .filter(|b| b.confidence > self.confidence_threshold)
            .map(|b| PixelBox::from_f32_corners(b.x1, b.y1, b.x2, b.y2))
            .collect();

        let contours = self.contour.detect(page);

        debug!(
            learned = learned.len(),
            contours = contours.len(),
            "Raw region candidates"
        );

        Ok(merge_regions(learned, contours, self.merge_iou_threshold))
    }
}

/// Keep every learned box; keep a contour box only when its IoU with every
/// learned box is at most `iou_threshold`.
pub fn merge_regions(
    learned: Vec<PixelBox>,
    contours: Vec<PixelBox>,
    iou_threshold: f64,
) -> Vec<CandidateRegion> {
    let mut merged: Vec<CandidateRegion> = learned
        .iter()
        .map(|&bounds| CandidateRegion {
            bounds,
            source: RegionSource::Learned,
        })
        .collect();

    for bounds in contours {
        let duplicate = learned.iter().any(|l| bounds.iou(l) > iou_threshold);
        if duplicate {
            continue;
        }
        merged.push(CandidateRegion {
            bounds,
            source: RegionSource::Contour,
        });
    }

    merged
}

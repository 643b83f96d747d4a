//! Learned region detector backed by a YOLOv8 ONNX model.

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array;
use ort::{session::Session, value::TensorRef};
use tracing::{debug, info};

use crate::config::DetectionConfig;
use crate::error::DetectionError;

use super::{ObjectDetector, ScoredBox};

/// Detections scoring below this never leave the adapter. The caller applies
/// its own, stricter cut.
const CONFIDENCE_FLOOR: f32 = 0.25;

/// YOLOv8 detector. The ONNX session is loaded once and reused for every page.
pub struct YoloDetector {
    // ort needs `&mut Session` to run
    session: Mutex<Session>,
    input_size: u32,
    nms_iou_threshold: f32,
}

impl YoloDetector {
    pub fn load(config: &DetectionConfig) -> Result<Self, DetectionError> {
        let path = config.model_path.as_path();
        info!(path = %path.display(), "Loading YOLOv8 model");

        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| model_load_error(path, e))?;

        info!("YOLOv8 model loaded");

        Ok(Self {
            session: Mutex::new(session),
            input_size: config.input_size,
            nms_iou_threshold: config.nms_iou_threshold,
        })
    }

    /// Resize to the model's square input and lay out as normalized NCHW.
    fn preprocess(&self, image: &RgbImage) -> Array<f32, ndarray::Ix4> {
        let size = self.input_size;
        let resized =
            image::imageops::resize(image, size, size, image::imageops::FilterType::Triangle);

        let mut input = Array::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            input[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
            input[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
            input[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
        }
        input
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<ScoredBox>, DetectionError> {
        let input = self.preprocess(image);
        let tensor = TensorRef::from_array_view(input.view()).map_err(inference_error)?;

        let mut session = self.session.lock().map_err(|_| DetectionError::Inference {
            message: "detector session lock poisoned".to_string(),
        })?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(inference_error)?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;
        let dims: Vec<usize> = shape.as_ref().iter().map(|&d| d as usize).collect();

        let scale_x = image.width() as f32 / self.input_size as f32;
        let scale_y = image.height() as f32 / self.input_size as f32;
        let raw = decode_predictions(&dims, data, scale_x, scale_y)?;
        debug!(raw = raw.len(), "Decoded YOLO predictions");

        let kept = non_max_suppression(raw, self.nms_iou_threshold);
        debug!(kept = kept.len(), "Detections after NMS");

        Ok(kept.into_iter().map(|(_, b)| b).collect())
    }
}

/// Decode a `[1, 4 + classes, anchors]` YOLOv8 output into pixel boxes tagged
/// with their best class.
fn decode_predictions(
    dims: &[usize],
    data: &[f32],
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<(usize, ScoredBox)>, DetectionError> {
    if dims.len() != 3 || dims[1] <= 4 {
        return Err(DetectionError::Inference {
            message: format!("unexpected YOLO output shape {:?}", dims),
        });
    }
    let features = dims[1];
    let anchors = dims[2];
    if data.len() < features * anchors {
        return Err(DetectionError::Inference {
            message: format!(
                "YOLO output holds {} values, shape {:?} needs {}",
                data.len(),
                dims,
                features * anchors
            ),
        });
    }

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let feature = |i: usize| data[i * anchors + anchor];

        let (class, confidence) = (4..features)
            .map(|i| (i - 4, feature(i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < CONFIDENCE_FLOOR {
            continue;
        }

        let (cx, cy, w, h) = (feature(0), feature(1), feature(2), feature(3));
        detections.push((
            class,
            ScoredBox {
                x1: (cx - w / 2.0) * scale_x,
                y1: (cy - h / 2.0) * scale_y,
                x2: (cx + w / 2.0) * scale_x,
                y2: (cy + h / 2.0) * scale_y,
                confidence,
            },
        ));
    }
    Ok(detections)
}

/// Greedy per-class non-maximum suppression, highest confidence first.
fn non_max_suppression(
    mut detections: Vec<(usize, ScoredBox)>,
    iou_threshold: f32,
) -> Vec<(usize, ScoredBox)> {
    detections.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));

    let mut keep: Vec<(usize, ScoredBox)> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep
            .iter()
            .any(|k| k.0 == candidate.0 && box_iou(&k.1, &candidate.1) > iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

fn box_iou(a: &ScoredBox, b: &ScoredBox) -> f32 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = w * h;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - intersection;
    if union > 0.0 { intersection / union } else { 0.0 }
}

fn model_load_error(path: &Path, e: impl std::fmt::Display) -> DetectionError {
    DetectionError::ModelLoad {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn inference_error(e: impl std::fmt::Display) -> DetectionError {
    DetectionError::Inference {
        message: e.to_string(),
    }
}

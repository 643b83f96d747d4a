//! Geometric region detection from edges and outer contours.
//!
//! Pipeline: grayscale -> Gaussian blur -> Canny edges -> dilation ->
//! outermost contour tracing -> area filter -> bounding boxes.

use image::RgbImage;
use imageproc::contours::{BorderType, Contour, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use tracing::trace;

use crate::config::DetectionConfig;
use crate::ingestion::geometry::PixelBox;

/// Edge/contour based region detector
#[derive(Debug, Clone)]
pub struct ContourDetector {
    blur_sigma: f32,
    canny_low: f32,
    canny_high: f32,
    dilate_iterations: u8,
    min_area: f64,
}

impl ContourDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            blur_sigma: config.blur_sigma,
            canny_low: config.canny_low,
            canny_high: config.canny_high,
            dilate_iterations: config.dilate_iterations,
            min_area: config.contour_min_area,
        }
    }

    /// Return `[x, y, x + w, y + h]` for every outermost contour enclosing
    /// more than the configured minimum area.
    pub fn detect(&self, page: &RgbImage) -> Vec<PixelBox> {
        let gray = image::imageops::grayscale(page);
        let blurred = gaussian_blur_f32(&gray, self.blur_sigma);
        let edges = canny(&blurred, self.canny_low, self.canny_high);
        // k iterations of a 3x3 square element == one L-inf dilation of radius k
        let dilated = if self.dilate_iterations > 0 {
            dilate(&edges, Norm::LInf, self.dilate_iterations)
        } else {
            edges
        };

        find_contours::<i32>(&dilated)
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|c| {
                let area = polygon_area(c);
                if area <= self.min_area {
                    trace!(area, "Dropping small contour");
                    return None;
                }
                bounding_rect(c)
            })
            .collect()
    }
}

/// Polygon area of a traced contour (shoelace formula).
fn polygon_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }

    let mut twice_area: i64 = 0;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += i64::from(p.x) * i64::from(q.y) - i64::from(q.x) * i64::from(p.y);
    }
    twice_area.abs() as f64 / 2.0
}

/// Axis-aligned bounding rectangle, width and height counted inclusively.
fn bounding_rect(contour: &Contour<i32>) -> Option<PixelBox> {
    let min_x = contour.points.iter().map(|p| p.x).min()?;
    let max_x = contour.points.iter().map(|p| p.x).max()?;
    let min_y = contour.points.iter().map(|p| p.y).min()?;
    let max_y = contour.points.iter().map(|p| p.y).max()?;

    Some(PixelBox::new(
        i64::from(min_x),
        i64::from(min_y),
        i64::from(max_x) + 1,
        i64::from(max_y) + 1,
    ))
}

//! Mapping between PDF vector space and raster pixel space.

use super::geometry::Rectangle;

/// Per-axis scale between a page's vector size and its rendered raster.
///
/// Pages are assumed axis-aligned and unrotated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateReconciler {
    pub scale_x: f64,
    pub scale_y: f64,
}

impl CoordinateReconciler {
    pub fn new(pdf_width: f64, pdf_height: f64, image_width: u32, image_height: u32) -> Self {
        Self {
            scale_x: f64::from(image_width) / pdf_width,
            scale_y: f64::from(image_height) / pdf_height,
        }
    }

    /// Map a top-left-origin vector rectangle into pixel space.
    pub fn to_pixels(&self, rect: &Rectangle) -> Rectangle {
        Rectangle {
            x1: rect.x1 * self.scale_x,
            y1: rect.y1 * self.scale_y,
            x2: rect.x2 * self.scale_x,
            y2: rect.y2 * self.scale_y,
        }
    }
}

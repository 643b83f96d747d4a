//! Axis-aligned box geometry shared by detection, matching and extraction.

use serde::Serialize;

/// Rectangle with floating point corners, top-left origin.
///
/// Used both for PDF vector space (points) and for reconciled pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rectangle {
    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).abs()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rectangle) -> Rectangle {
        Rectangle {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }
}

/// Integer pixel box `[x1, y1, x2, y2]` on a raster page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "[i64; 4]")]
pub struct PixelBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl PixelBox {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Truncate float corners toward zero.
    pub fn from_f32_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1 as i64, y1 as i64, x2 as i64, y2 as i64)
    }

    pub fn width(&self) -> i64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i64 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 + self.x2) as f64 / 2.0,
            (self.y1 + self.y2) as f64 / 2.0,
        )
    }

    /// Area counting both boundary pixels, i.e. `(w + 1) * (h + 1)`.
    fn inclusive_area(&self) -> i64 {
        (self.x2 - self.x1 + 1) * (self.y2 - self.y1 + 1)
    }

    /// Intersection over union with inclusive pixel boundaries.
    pub fn iou(&self, other: &PixelBox) -> f64 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = (ix2 - ix1 + 1).max(0) * (iy2 - iy1 + 1).max(0);
        let union = self.inclusive_area() + other.inclusive_area() - intersection;
        if union <= 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }

    /// Clamp every corner into `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> PixelBox {
        let (w, h) = (i64::from(width), i64::from(height));
        PixelBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

impl From<PixelBox> for [i64; 4] {
    fn from(b: PixelBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Euclidean distance between two points.
pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_of_heavily_overlapping_boxes() {
        let learned = PixelBox::new(0, 0, 100, 100);
        let contour = PixelBox::new(10, 10, 110, 110);
        let iou = learned.iou(&contour);
        // 91*91 / (2*101*101 - 91*91)
        assert!((iou - 0.6832).abs() < 1e-3, "iou was {}", iou);
    }

    #[test]
    fn test_iou_of_disjoint_boxes_is_zero() {
        let a = PixelBox::new(0, 0, 100, 100);
        let b = PixelBox::new(200, 200, 300, 300);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_of_identical_boxes_is_one() {
        let a = PixelBox::new(5, 5, 50, 60);
        assert_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn test_iou_counts_touching_edge_as_overlap() {
        // Inclusive boundaries: sharing column x=10 gives a 1px wide intersection
        let a = PixelBox::new(0, 0, 10, 10);
        let b = PixelBox::new(10, 0, 20, 10);
        assert!(a.iou(&b) > 0.0);
    }

    #[test]
    fn test_clamp_to_page() {
        let b = PixelBox::new(-5, -1, 120, 40);
        assert_eq!(b.clamp_to(100, 100), PixelBox::new(0, 0, 100, 40));
    }

    #[test]
    fn test_pixel_box_serializes_as_array() {
        let json = serde_json::to_string(&PixelBox::new(1, 2, 3, 4)).unwrap();
        assert_eq!(json, "[1,2,3,4]");
    }

    #[test]
    fn test_distance() {
        assert!((distance((50.0, 50.0), (60.0, 60.0)) - 14.142).abs() < 1e-3);
    }

    #[test]
    fn test_rectangle_union() {
        let a = Rectangle {
            x1: 10.0,
            y1: 10.0,
            x2: 20.0,
            y2: 15.0,
        };
        let b = Rectangle {
            x1: 0.0,
            y1: 18.0,
            x2: 12.0,
            y2: 25.0,
        };
        let u = a.union(&b);
        assert_eq!((u.x1, u.y1, u.x2, u.y2), (0.0, 10.0, 20.0, 25.0));
    }
}

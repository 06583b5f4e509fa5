use serde::{Deserialize, Serialize};

const HORIZONTAL_TOLERANCE_DEG: f64 = 10.0;
const VERTICAL_MIN_DEG: f64 = 80.0;
const VERTICAL_MAX_DEG: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Point> for [f64; 2] {
    fn from(value: Point) -> Self {
        [value.x, value.y]
    }
}

/// Axis-aligned box stored as `[x1, y1, x2, y2]` with `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

impl From<[f64; 4]> for BBox {
    fn from(value: [f64; 4]) -> Self {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(value: BBox) -> Self {
        [value.x1, value.y1, value.x2, value.y2]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
    Diagonal,
}

impl Orientation {
    /// Classifies an angle in degrees as returned by [`angle_degrees`].
    pub fn from_angle(angle: f64) -> Self {
        let abs = angle.abs();
        if abs < HORIZONTAL_TOLERANCE_DEG || abs > 180.0 - HORIZONTAL_TOLERANCE_DEG {
            Orientation::Horizontal
        } else if (VERTICAL_MIN_DEG..=VERTICAL_MAX_DEG).contains(&abs) {
            Orientation::Vertical
        } else {
            Orientation::Diagonal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Horizontal => "horizontal",
            Orientation::Vertical => "vertical",
            Orientation::Diagonal => "diagonal",
        }
    }
}

pub(crate) fn segment_length(start: &Point, end: &Point) -> f64 {
    (end.x - start.x).hypot(end.y - start.y)
}

/// Angle of the segment in degrees, in `(-180, 180]`. Zero-length segments yield 0.
pub(crate) fn angle_degrees(start: &Point, end: &Point) -> f64 {
    (end.y - start.y).atan2(end.x - start.x).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orientation(x1: f64, y1: f64, x2: f64, y2: f64) -> Orientation {
        Orientation::from_angle(angle_degrees(&Point::new(x1, y1), &Point::new(x2, y2)))
    }

    #[test]
    fn classifies_axis_aligned_segments() {
        assert_eq!(orientation(0.0, 0.0, 100.0, 0.0), Orientation::Horizontal);
        assert_eq!(orientation(100.0, 0.0, 0.0, 0.0), Orientation::Horizontal);
        assert_eq!(orientation(0.0, 0.0, 0.0, 50.0), Orientation::Vertical);
        assert_eq!(orientation(0.0, 50.0, 0.0, 0.0), Orientation::Vertical);
        assert_eq!(orientation(0.0, 0.0, 50.0, 50.0), Orientation::Diagonal);
    }

    #[test]
    fn angle_thresholds_are_exclusive_for_horizontal_and_inclusive_for_vertical() {
        assert_eq!(Orientation::from_angle(9.99), Orientation::Horizontal);
        assert_eq!(Orientation::from_angle(10.0), Orientation::Diagonal);
        assert_eq!(Orientation::from_angle(-170.5), Orientation::Horizontal);
        assert_eq!(Orientation::from_angle(170.0), Orientation::Diagonal);
        assert_eq!(Orientation::from_angle(80.0), Orientation::Vertical);
        assert_eq!(Orientation::from_angle(-100.0), Orientation::Vertical);
        assert_eq!(Orientation::from_angle(100.1), Orientation::Diagonal);
    }

    #[test]
    fn zero_length_segment_is_horizontal() {
        assert_eq!(orientation(5.0, 5.0, 5.0, 5.0), Orientation::Horizontal);
        assert_eq!(segment_length(&Point::new(5.0, 5.0), &Point::new(5.0, 5.0)), 0.0);
    }

    #[test]
    fn bbox_normalizes_corners() {
        let bbox = BBox::new(40.0, 30.0, 10.0, 10.0);
        assert_eq!(bbox, BBox::new(10.0, 10.0, 40.0, 30.0));
        assert_eq!(bbox.area(), 600.0);
        assert_eq!(bbox.centroid(), Point::new(25.0, 20.0));
    }

    #[test]
    fn bbox_serializes_as_four_numbers() {
        let bbox = BBox::new(1.0, 2.0, 3.0, 4.0);
        let value = serde_json::to_value(bbox).unwrap();
        assert_eq!(value, serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        let parsed: BBox = serde_json::from_value(serde_json::json!([3, 4, 1, 2])).unwrap();
        assert_eq!(parsed, bbox);
    }
}

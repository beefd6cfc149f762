// THEORY:
// `BBox` is the geometric unit the whole augmenter protects. It is a "dumb" data
// container in COCO convention: top-left corner plus width and height, all in
// absolute pixels of the image it belongs to. Geometric operations hand back boxes
// that may stick out of the canvas; the transform executor clips them and uses
// the area ratio to decide whether the labeled object survived.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle `[x, y, width, height]` in absolute pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a box from its top-left and bottom-right corners.
    pub fn from_corners(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self::new(x_min, y_min, x_max - x_min, y_max - y_min)
    }

    pub fn x_max(&self) -> f64 {
        self.x + self.width
    }

    pub fn y_max(&self) -> f64 {
        self.y + self.height
    }

    /// Area, or zero for inverted boxes.
    pub fn area(&self) -> f64 {
        if self.width <= 0.0 || self.height <= 0.0 {
            0.0
        } else {
            self.width * self.height
        }
    }

    /// The four corners, clockwise from top-left.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.x, self.y),
            (self.x_max(), self.y),
            (self.x_max(), self.y_max()),
            (self.x, self.y_max()),
        ]
    }

    /// Intersection of this box with the canvas `[0, width] x [0, height]`.
    /// Boxes entirely outside the canvas collapse to zero area.
    pub fn clip_to(&self, canvas_width: u32, canvas_height: u32) -> BBox {
        let x_min = self.x.clamp(0.0, canvas_width as f64);
        let y_min = self.y.clamp(0.0, canvas_height as f64);
        let x_max = self.x_max().clamp(0.0, canvas_width as f64);
        let y_max = self.y_max().clamp(0.0, canvas_height as f64);
        BBox::from_corners(x_min, y_min, x_max.max(x_min), y_max.max(y_min))
    }

    /// Fraction of this box's area that is still inside the canvas.
    pub fn visible_fraction(&self, canvas_width: u32, canvas_height: u32) -> f64 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        self.clip_to(canvas_width, canvas_height).area() / area
    }

    /// True when the box has positive extent and lies within the canvas.
    pub fn is_valid_within(&self, canvas_width: u32, canvas_height: u32) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && self.x >= 0.0
            && self.y >= 0.0
            && self.x_max() <= canvas_width as f64
            && self.y_max() <= canvas_height as f64
    }

    /// Smallest axis-aligned box enclosing a set of points.
    pub fn enclosing(points: &[(f64, f64)]) -> BBox {
        let (mut x_min, mut y_min) = (f64::INFINITY, f64::INFINITY);
        let (mut x_max, mut y_max) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &(x, y) in points {
            x_min = x_min.min(x);
            y_min = y_min.min(y);
            x_max = x_max.max(x);
            y_max = y_max.max(y);
        }
        BBox::from_corners(x_min, y_min, x_max, y_max)
    }

    /// Scales the box by independent horizontal and vertical factors.
    pub fn scale(&self, sx: f64, sy: f64) -> BBox {
        BBox::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    pub fn translate(&self, dx: f64, dy: f64) -> BBox {
        BBox::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

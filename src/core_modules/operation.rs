// THEORY:
// The `operation` module defines the single capability the rest of the augmenter
// consumes: "apply one stochastic image operation to an image and its one labeled
// box". Everything above this layer (policies, the transform executor, the driver)
// talks to the `TransformOp` trait only, which is what lets the tests swap the real
// pixel work for deterministic fakes.
//
// Contract of `TransformOp::apply`:
// 1.  **Joint Update**: The returned box is expressed in the coordinate frame of
//     the returned image. Geometric operations (crop, flip, rotate) move it;
//     photometric ones (brightness, blur, jitter, noise) hand it back untouched.
// 2.  **Unclipped Output**: A geometric operation does NOT clip the box to the new
//     canvas. Clipping and the visibility bookkeeping belong to the executor, which
//     needs the unclipped area to measure how much of the object was lost.
// 3.  **Explicit Failure**: `None` means the operation could not run on this input
//     (for example a box with no area). The executor turns it into a rejection.
// 4.  **Probability Is Metadata**: An operation never rolls its own dice to decide
//     *whether* to fire. It only reports `probability()`; the executor decides.
//
// The default implementations below are built on `image::imageops` and `imageproc`.

use crate::core_modules::bbox::BBox;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};

/// Coarse classification of what an operation does to the geometry of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Moves or rescales pixels (crop, rotate).
    Geometric,
    /// A pure horizontal or vertical mirror.
    Mirror,
    /// Changes pixel values only; the box is unaffected.
    Photometric,
}

/// An injectable, bounding-box-aware stochastic image operation.
pub trait TransformOp: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Probability in `[0, 1]` that the executor fires this operation.
    fn probability(&self) -> f64;

    fn kind(&self) -> OpKind;

    /// Applies the operation unconditionally.
    fn apply(&self, image: &RgbImage, bbox: BBox, rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)>;
}

/// Rebuilds an image by mapping every pixel's channels through `f` (values in 0..=255).
fn map_channels(image: &RgbImage, f: impl Fn([f32; 3]) -> [f32; 3]) -> RgbImage {
    let (width, height) = image.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let p = image.get_pixel(x, y);
        let out = f([p[0] as f32, p[1] as f32, p[2] as f32]);
        Rgb([
            out[0].clamp(0.0, 255.0) as u8,
            out[1].clamp(0.0, 255.0) as u8,
            out[2].clamp(0.0, 255.0) as u8,
        ])
    })
}

fn luma(c: [f32; 3]) -> f32 {
    0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2]
}

fn mean_luma(image: &RgbImage) -> f32 {
    let count = (image.width() as u64 * image.height() as u64).max(1) as f64;
    let sum: f64 = image
        .pixels()
        .map(|p| luma([p[0] as f32, p[1] as f32, p[2] as f32]) as f64)
        .sum();
    (sum / count) as f32
}

// ================================ Geometric ================================

/// Crops a random window that fully contains the box, then resizes it to a fixed
/// output size. The box always survives the crop itself.
#[derive(Debug, Clone)]
pub struct RandomSizedBBoxSafeCrop {
    pub width: u32,
    pub height: u32,
    pub p: f64,
}

impl TransformOp for RandomSizedBBoxSafeCrop {
    fn name(&self) -> &'static str {
        "RandomSizedBBoxSafeCrop"
    }

    fn probability(&self) -> f64 {
        self.p
    }

    fn kind(&self) -> OpKind {
        OpKind::Geometric
    }

    fn apply(&self, image: &RgbImage, bbox: BBox, rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)> {
        let (img_w, img_h) = image.dimensions();
        let inner = bbox.clip_to(img_w, img_h);
        if inner.area() <= 0.0 || self.width == 0 || self.height == 0 {
            return None;
        }

        let left = rng.random_range(0.0..=inner.x);
        let top = rng.random_range(0.0..=inner.y);
        let right = rng.random_range(inner.x_max()..=img_w as f64);
        let bottom = rng.random_range(inner.y_max()..=img_h as f64);

        let x0 = left.floor() as u32;
        let y0 = top.floor() as u32;
        let x1 = (right.ceil() as u32).clamp(x0 + 1, img_w);
        let y1 = (bottom.ceil() as u32).clamp(y0 + 1, img_h);
        let (crop_w, crop_h) = (x1 - x0, y1 - y0);

        let cropped = imageops::crop_imm(image, x0, y0, crop_w, crop_h).to_image();
        let resized = imageops::resize(&cropped, self.width, self.height, FilterType::Triangle);

        let sx = self.width as f64 / crop_w as f64;
        let sy = self.height as f64 / crop_h as f64;
        let moved = bbox.translate(-(x0 as f64), -(y0 as f64)).scale(sx, sy);
        Some((resized, moved))
    }
}

#[derive(Debug, Clone)]
pub struct HorizontalFlip {
    pub p: f64,
}

impl TransformOp for HorizontalFlip {
    fn name(&self) -> &'static str {
        "HorizontalFlip"
    }

    fn probability(&self) -> f64 {
        self.p
    }

    fn kind(&self) -> OpKind {
        OpKind::Mirror
    }

    fn apply(&self, image: &RgbImage, bbox: BBox, _rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)> {
        let flipped = imageops::flip_horizontal(image);
        let x = image.width() as f64 - bbox.x_max();
        Some((flipped, BBox::new(x, bbox.y, bbox.width, bbox.height)))
    }
}

#[derive(Debug, Clone)]
pub struct VerticalFlip {
    pub p: f64,
}

impl TransformOp for VerticalFlip {
    fn name(&self) -> &'static str {
        "VerticalFlip"
    }

    fn probability(&self) -> f64 {
        self.p
    }

    fn kind(&self) -> OpKind {
        OpKind::Mirror
    }

    fn apply(&self, image: &RgbImage, bbox: BBox, _rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)> {
        let flipped = imageops::flip_vertical(image);
        let y = image.height() as f64 - bbox.y_max();
        Some((flipped, BBox::new(bbox.x, y, bbox.width, bbox.height)))
    }
}

/// Rotates about the image center by a random angle in `[-limit, limit]` degrees,
/// keeping the canvas size. The new box is the envelope of the rotated corners.
#[derive(Debug, Clone)]
pub struct Rotate {
    pub limit_degrees: f64,
    pub p: f64,
}

impl TransformOp for Rotate {
    fn name(&self) -> &'static str {
        "Rotate"
    }

    fn probability(&self) -> f64 {
        self.p
    }

    fn kind(&self) -> OpKind {
        OpKind::Geometric
    }

    fn apply(&self, image: &RgbImage, bbox: BBox, rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)> {
        let degrees = rng.random_range(-self.limit_degrees..=self.limit_degrees);
        let theta = degrees.to_radians();
        let rotated = rotate_about_center(image, theta as f32, Interpolation::Bilinear, Rgb([0, 0, 0]));

        // Clockwise in image coordinates (y grows downwards), matching imageproc.
        let cx = image.width() as f64 / 2.0;
        let cy = image.height() as f64 / 2.0;
        let (sin, cos) = theta.sin_cos();
        let corners = bbox.corners().map(|(x, y)| {
            let (dx, dy) = (x - cx, y - cy);
            (cx + dx * cos - dy * sin, cy + dx * sin + dy * cos)
        });
        Some((rotated, BBox::enclosing(&corners)))
    }
}

// =============================== Photometric ===============================

/// Random linear brightness/contrast change: `alpha * pixel + beta * 255`.
#[derive(Debug, Clone)]
pub struct RandomBrightnessContrast {
    pub brightness_limit: f32,
    pub contrast_limit: f32,
    pub p: f64,
}

impl TransformOp for RandomBrightnessContrast {
    fn name(&self) -> &'static str {
        "RandomBrightnessContrast"
    }

    fn probability(&self) -> f64 {
        self.p
    }

    fn kind(&self) -> OpKind {
        OpKind::Photometric
    }

    fn apply(&self, image: &RgbImage, bbox: BBox, rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)> {
        let alpha = 1.0 + rng.random_range(-self.contrast_limit..=self.contrast_limit);
        let beta = rng.random_range(-self.brightness_limit..=self.brightness_limit) * 255.0;
        let out = map_channels(image, |c| c.map(|v| v * alpha + beta));
        Some((out, bbox))
    }
}

/// Box-like blur with a random odd kernel size in `3..=max_kernel`.
#[derive(Debug, Clone)]
pub struct Blur {
    pub max_kernel: u32,
    pub p: f64,
}

impl TransformOp for Blur {
    fn name(&self) -> &'static str {
        "Blur"
    }

    fn probability(&self) -> f64 {
        self.p
    }

    fn kind(&self) -> OpKind {
        OpKind::Photometric
    }

    fn apply(&self, image: &RgbImage, bbox: BBox, rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)> {
        let steps = (self.max_kernel.max(3) - 3) / 2;
        let kernel = 3 + 2 * rng.random_range(0..=steps);
        // Gaussian sigma equivalent of an odd kernel size.
        let sigma = 0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8;
        Some((imageops::blur(image, sigma), bbox))
    }
}

/// Random brightness, contrast, saturation and hue jitter, applied in that order.
#[derive(Debug, Clone)]
pub struct ColorJitter {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    /// Fraction of a full hue turn, in `[0, 0.5]`.
    pub hue: f32,
    pub p: f64,
}

impl TransformOp for ColorJitter {
    fn name(&self) -> &'static str {
        "ColorJitter"
    }

    fn probability(&self) -> f64 {
        self.p
    }

    fn kind(&self) -> OpKind {
        OpKind::Photometric
    }

    fn apply(&self, image: &RgbImage, bbox: BBox, rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)> {
        let b = rng.random_range(1.0 - self.brightness..=1.0 + self.brightness);
        let c = rng.random_range(1.0 - self.contrast..=1.0 + self.contrast);
        let s = rng.random_range(1.0 - self.saturation..=1.0 + self.saturation);
        let h = rng.random_range(-self.hue..=self.hue);

        let brightened = map_channels(image, |px| px.map(|v| v * b));
        let mean = mean_luma(&brightened);
        let contrasted = map_channels(&brightened, |px| px.map(|v| mean + c * (v - mean)));
        let saturated = map_channels(&contrasted, |px| {
            let gray = luma(px);
            px.map(|v| gray + s * (v - gray))
        });
        let hue_degrees = (h * 360.0).round() as i32;
        let out = if hue_degrees == 0 {
            saturated
        } else {
            imageops::huerotate(&saturated, hue_degrees)
        };
        Some((out, bbox))
    }
}

/// Additive per-channel Gaussian noise with a random variance in `[var_min, var_max]`.
#[derive(Debug, Clone)]
pub struct GaussNoise {
    pub var_min: f64,
    pub var_max: f64,
    pub p: f64,
}

impl TransformOp for GaussNoise {
    fn name(&self) -> &'static str {
        "GaussNoise"
    }

    fn probability(&self) -> f64 {
        self.p
    }

    fn kind(&self) -> OpKind {
        OpKind::Photometric
    }

    fn apply(&self, image: &RgbImage, bbox: BBox, rng: &mut dyn RngCore) -> Option<(RgbImage, BBox)> {
        let variance = rng.random_range(self.var_min..=self.var_max);
        let normal = Normal::new(0.0f32, variance.sqrt() as f32).ok()?;
        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            for channel in pixel.0.iter_mut() {
                let noisy = *channel as f32 + normal.sample(rng);
                *channel = noisy.clamp(0.0, 255.0) as u8;
            }
        }
        Some((out, bbox))
    }
}

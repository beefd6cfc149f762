// THEORY:
// The `transform` module is the Transform Pipeline Executor. It runs one `Policy`
// over one (image, box, label) triple and either returns exactly one usable sample
// or says explicitly why it could not.
//
// Algorithm:
// 1.  The source box is clipped to the source canvas; a box with no area is
//     rejected before any pixel work.
// 2.  Each operation fires independently with its own probability.
// 3.  After a geometric operation the returned (unclipped) box is clipped to the
//     new canvas and a running visible fraction is multiplied by
//     `clipped_area / unclipped_area`. Because every operation reports its box in
//     its own output frame, the product is the share of the original object that
//     is still on the canvas, independent of any rescaling.
// 4.  A final fraction below the policy threshold is a `Rejection`, never an empty
//     list the caller could index into.
//
// Like the other analysis utilities this is stateless: everything it needs comes
// in as arguments.

use crate::core_modules::bbox::BBox;
use crate::core_modules::policy::Policy;
use image::RgbImage;
use rand::{Rng, RngCore};
use thiserror::Error;

/// Why a transformed sample was discarded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("operation {operation} could not be applied")]
    OperationFailed { operation: &'static str },

    #[error("visible fraction {fraction:.3} is below the threshold {threshold:.3}")]
    LowVisibility { fraction: f64, threshold: f64 },

    #[error("bounding box has no area inside the image")]
    DegenerateBox,
}

/// The single output of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct TransformedSample {
    pub image: RgbImage,
    /// COCO `[x, y, w, h]` in absolute pixels of `image`.
    pub bbox: BBox,
    pub category_id: u32,
    /// Share of the original box still visible.
    pub visibility: f64,
    /// Names of the operations that fired, in order.
    pub applied: Vec<&'static str>,
}

pub mod transform_pipeline {
    use super::*;

    /// Applies `policy` to the image and its box jointly.
    pub fn apply(
        image: &RgbImage,
        bbox: BBox,
        category_id: u32,
        policy: &Policy,
        rng: &mut dyn RngCore,
    ) -> Result<TransformedSample, Rejection> {
        let (src_w, src_h) = image.dimensions();
        let mut current_box = bbox.clip_to(src_w, src_h);
        if current_box.area() <= 0.0 {
            return Err(Rejection::DegenerateBox);
        }

        let mut current_image: Option<RgbImage> = None;
        let mut visibility = 1.0;
        let mut applied = Vec::new();

        for op in policy.operations() {
            if !rng.random_bool(op.probability().clamp(0.0, 1.0)) {
                continue;
            }

            let input = current_image.as_ref().unwrap_or(image);
            let (next_image, moved) = op
                .apply(input, current_box, rng)
                .ok_or(Rejection::OperationFailed { operation: op.name() })?;

            let unclipped = moved.area();
            if unclipped <= 0.0 {
                return Err(Rejection::DegenerateBox);
            }
            let (w, h) = next_image.dimensions();
            let clipped = moved.clip_to(w, h);
            visibility *= clipped.area() / unclipped;

            current_box = clipped;
            current_image = Some(next_image);
            applied.push(op.name());
        }

        let threshold = policy.min_visibility();
        if visibility < threshold {
            return Err(Rejection::LowVisibility {
                fraction: visibility,
                threshold,
            });
        }

        let image = current_image.unwrap_or_else(|| image.clone());
        if !current_box.is_valid_within(image.width(), image.height()) {
            return Err(Rejection::DegenerateBox);
        }

        Ok(TransformedSample {
            image,
            bbox: current_box,
            category_id,
            visibility,
            applied,
        })
    }
}

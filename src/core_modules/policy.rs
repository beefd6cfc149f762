// THEORY:
// The `policy` module is the Policy Catalog. It answers one question: "which set of
// stochastic operations may be applied to an object of this category?"
//
// Key architectural principles:
// 1.  **Closed Set of Named Variants**: Every policy is a `PolicyKind` variant that
//     owns its own operation table. Adding a policy means adding a variant and its
//     table; the existing tables are never touched.
// 2.  **Pure Mapping**: `PolicyCatalog::kind_for` is a pure function of the category
//     id and the configured no-flip set. Orientation-dependent categories (arrows,
//     directional signs) must never be mirrored.
// 3.  **Shuffle Once**: A `Policy` shuffles its operations exactly once when it is
//     built. Every operation still fires independently with its own probability;
//     the order only changes the intermediate pixels.
// 4.  **Seam for Tests**: Drivers depend on the `PolicySelector` trait, so a test
//     can hand them a selector that returns deterministic fake operations.

use crate::core_modules::operation::{
    Blur, ColorJitter, GaussNoise, HorizontalFlip, OpKind, RandomBrightnessContrast,
    RandomSizedBBoxSafeCrop, Rotate, TransformOp, VerticalFlip,
};
use rand::RngCore;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;

pub const DEFAULT_MIN_VISIBILITY: f64 = 0.9;

/// The named policies known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Every operation, flips included.
    AllTransform,
    /// Every operation except horizontal and vertical flips.
    NoFlip,
}

/// Values shared by every operation table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyParams {
    /// Output size of the bbox-safe crop.
    pub crop_width: u32,
    pub crop_height: u32,
    pub min_visibility: f64,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            crop_width: 640,
            crop_height: 480,
            min_visibility: DEFAULT_MIN_VISIBILITY,
        }
    }
}

impl PolicyKind {
    pub fn name(self) -> &'static str {
        match self {
            PolicyKind::AllTransform => "AllTransform",
            PolicyKind::NoFlip => "NoFlip",
        }
    }

    /// The operation table of this variant, in declaration order.
    pub fn operations(self, params: &PolicyParams) -> Vec<Box<dyn TransformOp>> {
        let crop = RandomSizedBBoxSafeCrop {
            width: params.crop_width,
            height: params.crop_height,
            p: 0.5,
        };
        let brightness_contrast = RandomBrightnessContrast {
            brightness_limit: 0.2,
            contrast_limit: 0.2,
            p: 0.2,
        };
        let blur = Blur { max_kernel: 7, p: 0.2 };
        let noise = GaussNoise {
            var_min: 10.0,
            var_max: 50.0,
            p: 0.2,
        };
        let jitter = |p| ColorJitter {
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.2,
            hue: 0.2,
            p,
        };

        match self {
            PolicyKind::AllTransform => vec![
                Box::new(crop),
                Box::new(HorizontalFlip { p: 0.2 }),
                Box::new(VerticalFlip { p: 0.2 }),
                Box::new(brightness_contrast),
                Box::new(Rotate {
                    limit_degrees: 10.0,
                    p: 0.2,
                }),
                Box::new(blur),
                Box::new(jitter(0.2)),
                Box::new(noise),
            ],
            PolicyKind::NoFlip => vec![
                Box::new(crop),
                Box::new(brightness_contrast),
                Box::new(Rotate {
                    limit_degrees: 10.0,
                    p: 0.3,
                }),
                Box::new(blur),
                Box::new(jitter(0.3)),
                Box::new(noise),
            ],
        }
    }
}

/// An ordered set of operations plus the shared visibility constraint.
#[derive(Debug)]
pub struct Policy {
    name: &'static str,
    operations: Vec<Box<dyn TransformOp>>,
    min_visibility: f64,
}

impl Policy {
    /// Builds a catalog policy with its operations shuffled once.
    pub fn new(kind: PolicyKind, params: &PolicyParams, rng: &mut dyn RngCore) -> Self {
        Self::with_operations(kind.name(), kind.operations(params), params.min_visibility).shuffled(rng)
    }

    /// Builds a policy from arbitrary operations, keeping their order.
    pub fn with_operations(name: &'static str, operations: Vec<Box<dyn TransformOp>>, min_visibility: f64) -> Self {
        Self {
            name,
            operations,
            min_visibility,
        }
    }

    pub fn shuffled(mut self, rng: &mut dyn RngCore) -> Self {
        self.operations.shuffle(rng);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn operations(&self) -> &[Box<dyn TransformOp>] {
        &self.operations
    }

    pub fn min_visibility(&self) -> f64 {
        self.min_visibility
    }

    /// Whether any operation in this policy is a pure mirror.
    pub fn contains_mirror(&self) -> bool {
        self.operations.iter().any(|op| op.kind() == OpKind::Mirror)
    }
}

/// Anything that can hand out a policy for a category.
pub trait PolicySelector: Send + Sync {
    fn select(&self, category_id: u32, rng: &mut dyn RngCore) -> Policy;
}

/// The default category → policy mapping.
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    no_flip: BTreeSet<u32>,
    params: PolicyParams,
}

impl PolicyCatalog {
    pub fn new(no_flip: impl IntoIterator<Item = u32>, params: PolicyParams) -> Self {
        Self {
            no_flip: no_flip.into_iter().collect(),
            params,
        }
    }

    pub fn kind_for(&self, category_id: u32) -> PolicyKind {
        if self.no_flip.contains(&category_id) {
            PolicyKind::NoFlip
        } else {
            PolicyKind::AllTransform
        }
    }
}

impl PolicySelector for PolicyCatalog {
    fn select(&self, category_id: u32, rng: &mut dyn RngCore) -> Policy {
        Policy::new(self.kind_for(category_id), &self.params, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn catalog() -> PolicyCatalog {
        PolicyCatalog::new([2, 11, 12], PolicyParams::default())
    }

    #[test]
    fn no_flip_categories_never_get_a_mirror() {
        let catalog = catalog();
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..200 {
            for category in [2, 11, 12] {
                let policy = catalog.select(category, &mut rng);
                assert_eq!(policy.name(), "NoFlip");
                assert!(!policy.contains_mirror());
            }
        }
    }

    #[test]
    fn other_categories_get_the_full_policy() {
        let catalog = catalog();
        let mut rng = StdRng::seed_from_u64(0);
        let policy = catalog.select(3, &mut rng);
        assert_eq!(policy.name(), "AllTransform");
        assert!(policy.contains_mirror());
        assert_eq!(policy.operations().len(), 8);
        assert_eq!(policy.min_visibility(), DEFAULT_MIN_VISIBILITY);
    }

    #[test]
    fn shuffling_keeps_the_same_operations() {
        let params = PolicyParams::default();
        let mut rng = StdRng::seed_from_u64(42);
        let mut names: Vec<_> = Policy::new(PolicyKind::NoFlip, &params, &mut rng)
            .operations()
            .iter()
            .map(|op| op.name())
            .collect();
        let mut expected: Vec<_> = PolicyKind::NoFlip.operations(&params).iter().map(|op| op.name()).collect();
        names.sort();
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn mapping_is_deterministic() {
        let catalog = catalog();
        for _ in 0..10 {
            assert_eq!(catalog.kind_for(2), PolicyKind::NoFlip);
            assert_eq!(catalog.kind_for(1), PolicyKind::AllTransform);
        }
    }
}

// THEORY:
// The `pipeline` module is the top-level API of the augmenter: the Augmentation
// Driver. It wires the lower layers into one sequential run.
//
// Stages, per source annotation:
// 1.  **Resolve**: load the source image named after the annotation's `image_id`.
//     A missing or unreadable image skips this annotation only.
// 2.  **Select**: ask the `PolicySelector` for a fresh policy (one per attempt, so
//     every attempt gets its own shuffle).
// 3.  **Transform**: run the executor. A `Rejection` discards the attempt; it is not
//     retried and nothing is substituted, so `repetitions` counts attempts, not
//     successes.
// 4.  **Record**: an accepted sample gets the next identifier pair and becomes one
//     new image plus one new annotation carrying only this object's label and box.
//
// Known limitation: iteration is over annotations, not images. An image with three
// labeled objects is augmented three times independently, and each copy carries
// only one of the three labels.

use crate::config::AugmentConfig;
use crate::core_modules::allocator::IdAllocator;
use crate::core_modules::dataset::{Annotation, Dataset};
use crate::core_modules::policy::{PolicyCatalog, PolicySelector};
use crate::core_modules::transform::{Rejection, TransformedSample, transform_pipeline};
use crate::core_modules::utils::image_helper::image_helper;
use crate::error::Result;
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Locates source images by id (`<root>/<id zero-padded>.<ext>`).
#[derive(Debug, Clone)]
pub struct ImageDirectory {
    root: PathBuf,
    name_width: usize,
    extension: String,
}

impl ImageDirectory {
    pub fn new(root: impl Into<PathBuf>, name_width: usize, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name_width,
            extension: extension.into(),
        }
    }

    pub fn from_config(root: &Path, config: &AugmentConfig) -> Self {
        Self::new(root, config.image_name_width, config.image_extension.clone())
    }

    pub fn path_for(&self, image_id: u64) -> PathBuf {
        self.root.join(format!(
            "{:0width$}.{}",
            image_id,
            self.extension,
            width = self.name_width
        ))
    }

    pub fn load(&self, image_id: u64) -> Result<RgbImage> {
        image_helper::load_rgb(&self.path_for(image_id))
    }
}

/// One new image and its single annotation.
#[derive(Debug, Clone)]
pub struct GeneratedSample {
    pub image: RgbImage,
    pub annotation: Annotation,
    /// Id of the annotation this sample was derived from.
    pub source_annotation_id: u64,
}

/// A source annotation that could not be augmented.
#[derive(Debug, Clone)]
pub struct SkippedAnnotation {
    pub annotation_id: u64,
    pub image_id: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub annotations: usize,
    pub attempts: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub skipped: usize,
}

/// Everything a run produced, in generation order.
#[derive(Debug, Clone, Default)]
pub struct GeneratedSamples {
    pub samples: Vec<GeneratedSample>,
    pub skipped: Vec<SkippedAnnotation>,
    pub stats: RunStats,
}

impl GeneratedSamples {
    /// Gives an accepted sample its identifiers and appends it.
    pub(crate) fn record(&mut self, allocator: &mut IdAllocator, source: &Annotation, sample: TransformedSample) {
        let ids = allocator.next();
        self.samples.push(GeneratedSample {
            image: sample.image,
            annotation: Annotation {
                id: ids.annotation_id,
                image_id: ids.image_id,
                category_id: sample.category_id,
                bbox: sample.bbox,
            },
            source_annotation_id: source.id,
        });
        self.stats.accepted += 1;
    }

    pub(crate) fn skip(&mut self, source: &Annotation, reason: String) {
        warn!(
            annotation_id = source.id,
            image_id = source.image_id,
            %reason,
            "skipping annotation"
        );
        self.skipped.push(SkippedAnnotation {
            annotation_id: source.id,
            image_id: source.image_id,
            reason,
        });
        self.stats.skipped += 1;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// What debug mode hands back instead of a dataset.
#[derive(Debug, Clone)]
pub struct DebugInspection {
    pub source: Annotation,
    /// The last accepted sample of the inspected annotation, if any attempt survived.
    pub last: Option<TransformedSample>,
    pub attempts: u32,
    pub accepted: u32,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(GeneratedSamples),
    Debug(DebugInspection),
}

/// The accepted samples of one source object, before identifiers are assigned.
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectAugmentation {
    pub accepted: Vec<TransformedSample>,
    pub attempts: u32,
    pub rejected: u32,
}

/// Runs `repetitions` independent attempts on one object.
pub(crate) fn augment_object<S: PolicySelector + ?Sized>(
    selector: &S,
    image: &RgbImage,
    source: &Annotation,
    repetitions: u32,
    rng: &mut dyn RngCore,
) -> ObjectAugmentation {
    let mut result = ObjectAugmentation::default();
    for attempt in 0..repetitions {
        result.attempts += 1;
        let policy = selector.select(source.category_id, rng);
        match transform_pipeline::apply(image, source.bbox, source.category_id, &policy, rng) {
            Ok(sample) => result.accepted.push(sample),
            Err(rejection) => {
                result.rejected += 1;
                log_rejection(source, attempt, policy.name(), &rejection);
            }
        }
    }
    result
}

fn log_rejection(source: &Annotation, attempt: u32, policy: &str, rejection: &Rejection) {
    debug!(
        annotation_id = source.id,
        attempt,
        policy,
        %rejection,
        "discarding transformed sample"
    );
}

/// Sequential augmentation driver.
pub struct AugmentationPipeline<S: PolicySelector = PolicyCatalog> {
    selector: S,
    images: ImageDirectory,
    allocator: IdAllocator,
    rng: StdRng,
    debug: bool,
}

impl AugmentationPipeline<PolicyCatalog> {
    /// Driver with the default policy catalog, seeded from the config when a seed is set.
    pub fn from_config(config: &AugmentConfig, image_root: &Path) -> Self {
        let catalog = PolicyCatalog::new(config.no_flip_categories.iter().copied(), config.policy_params());
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::new(
            catalog,
            ImageDirectory::from_config(image_root, config),
            IdAllocator::new(config.annotation_id_base, config.image_id_base),
            rng,
        )
    }
}

impl<S: PolicySelector> AugmentationPipeline<S> {
    pub fn new(selector: S, images: ImageDirectory, allocator: IdAllocator, rng: StdRng) -> Self {
        Self {
            selector,
            images,
            allocator,
            rng,
            debug: false,
        }
    }

    /// In debug mode the run stops after the first annotation whose image loads and returns it for inspection.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    pub fn run(&mut self, dataset: &Dataset, repetitions: u32) -> Result<RunOutcome> {
        let annotations = dataset.parse_annotations()?;
        let mut generated = GeneratedSamples::default();
        generated.stats.annotations = annotations.len();

        for source in &annotations {
            let image = match self.images.load(source.image_id) {
                Ok(image) => image,
                Err(e) => {
                    generated.skip(source, e.to_string());
                    continue;
                }
            };

            let mut object = augment_object(&self.selector, &image, source, repetitions, &mut self.rng);
            generated.stats.attempts += object.attempts as u64;
            generated.stats.rejected += object.rejected as u64;

            if self.debug {
                info!(
                    annotation_id = source.id,
                    accepted = object.accepted.len(),
                    "debug mode: stopping after the first annotation"
                );
                let accepted = object.accepted.len() as u32;
                return Ok(RunOutcome::Debug(DebugInspection {
                    source: source.clone(),
                    last: object.accepted.pop(),
                    attempts: object.attempts,
                    accepted,
                }));
            }

            for sample in object.accepted {
                generated.record(&mut self.allocator, source, sample);
            }
        }

        info!(
            annotations = generated.stats.annotations,
            attempts = generated.stats.attempts,
            accepted = generated.stats.accepted,
            rejected = generated.stats.rejected,
            skipped = generated.stats.skipped,
            "augmentation finished"
        );
        Ok(RunOutcome::Completed(generated))
    }
}

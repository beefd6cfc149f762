// THEORY:
// Each source annotation's repetitions are an independent unit of work: their own
// random draws, their own image read, no shared state. The `ParallelPipeline` fans
// those units out over a pool of workers and fans the results back in.
//
// The one piece of shared state in a run, the `IdAllocator`, never leaves the
// pipeline. Workers return samples without identifiers; once every result is back
// the pipeline walks them in annotation order and assigns ids, so the output has
// exactly the shape a sequential run would produce.

use crate::config::AugmentConfig;
use crate::core_modules::allocator::IdAllocator;
use crate::core_modules::dataset::{Annotation, Dataset};
use crate::core_modules::policy::{PolicyCatalog, PolicySelector};
use crate::error::{AugmentError, Result};
use crate::pipeline::{GeneratedSamples, ImageDirectory, ObjectAugmentation, augment_object};
use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Per-annotation result travelling back from a worker.
type TaskResult = std::result::Result<ObjectAugmentation, String>;

pub(crate) struct AnnotationTask {
    annotation: Annotation,
    seed: u64,
    repetitions: u32,
    result_sender: oneshot::Sender<TaskResult>,
}

/// Round-robin pool of workers, each running blocking image work off the async threads.
pub(crate) struct WorkerPool {
    task_sender: mpsc::UnboundedSender<AnnotationTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new<S: PolicySelector + 'static>(worker_count: usize, selector: Arc<S>, images: ImageDirectory) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<AnnotationTask>();
        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) =
            (0..worker_count).map(|_| mpsc::unbounded_channel::<AnnotationTask>()).unzip();

        // Dispatcher
        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        let mut workers = Vec::with_capacity(worker_count);
        for mut worker_receiver in worker_receivers {
            let selector = Arc::clone(&selector);
            let images = images.clone();
            workers.push(tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let selector = Arc::clone(&selector);
                    let images = images.clone();
                    let AnnotationTask {
                        annotation,
                        seed,
                        repetitions,
                        result_sender,
                    } = task;
                    let result = tokio::task::spawn_blocking(move || -> TaskResult {
                        let image = images.load(annotation.image_id).map_err(|e| e.to_string())?;
                        let mut rng = StdRng::seed_from_u64(seed);
                        Ok(augment_object(selector.as_ref(), &image, &annotation, repetitions, &mut rng))
                    })
                    .await
                    .unwrap_or_else(|e| Err(format!("worker task panicked: {e}")));
                    let _ = result_sender.send(result);
                }
            }));
        }

        Self { task_sender, workers }
    }

    pub fn submit(&self, annotation: Annotation, seed: u64, repetitions: u32) -> Result<oneshot::Receiver<TaskResult>> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(AnnotationTask {
                annotation,
                seed,
                repetitions,
                result_sender,
            })
            .map_err(|_| AugmentError::Worker("failed to send task to worker pool".into()))?;
        Ok(result_receiver)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Derives the RNG seed of one annotation from the run seed.
fn task_seed(run_seed: u64, index: usize) -> u64 {
    run_seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

pub struct ParallelPipeline {
    worker_pool: WorkerPool,
    allocator: IdAllocator,
    run_seed: u64,
}

impl ParallelPipeline {
    pub fn from_config(config: &AugmentConfig, image_root: &Path) -> Self {
        let catalog = PolicyCatalog::new(config.no_flip_categories.iter().copied(), config.policy_params());
        let workers = config.workers.unwrap_or_else(num_cpus::get);
        let run_seed = config.seed.unwrap_or_else(rand::random);
        Self::new(
            Arc::new(catalog),
            ImageDirectory::from_config(image_root, config),
            IdAllocator::new(config.annotation_id_base, config.image_id_base),
            workers,
            run_seed,
        )
    }

    /// Must be called from within a tokio runtime.
    pub fn new<S: PolicySelector + 'static>(selector: Arc<S>, images: ImageDirectory, allocator: IdAllocator, workers: usize, run_seed: u64) -> Self {
        Self {
            worker_pool: WorkerPool::new(workers, selector, images),
            allocator,
            run_seed,
        }
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    pub async fn run(&mut self, dataset: &Dataset, repetitions: u32) -> Result<GeneratedSamples> {
        let annotations = dataset.parse_annotations()?;
        let mut receivers = Vec::with_capacity(annotations.len());
        for (index, annotation) in annotations.iter().enumerate() {
            receivers.push(self.worker_pool.submit(annotation.clone(), task_seed(self.run_seed, index), repetitions)?);
        }
        debug!(
            tasks = receivers.len(),
            workers = self.worker_pool.worker_count(),
            "dispatched annotations"
        );

        let results = join_all(receivers).await;

        let mut generated = GeneratedSamples::default();
        generated.stats.annotations = annotations.len();
        for (source, result) in annotations.iter().zip(results) {
            let object = result.map_err(|_| AugmentError::Worker("failed to receive result from worker".into()))?;
            match object {
                Ok(object) => {
                    generated.stats.attempts += object.attempts as u64;
                    generated.stats.rejected += object.rejected as u64;
                    for sample in object.accepted {
                        generated.record(&mut self.allocator, source, sample);
                    }
                }
                Err(reason) => generated.skip(source, reason),
            }
        }

        info!(
            annotations = generated.stats.annotations,
            attempts = generated.stats.attempts,
            accepted = generated.stats.accepted,
            rejected = generated.stats.rejected,
            skipped = generated.stats.skipped,
            "parallel augmentation finished"
        );
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::utils::image_helper::image_helper;
    use image::{Rgb, RgbImage};
    use serde_json::json;

    fn dataset() -> Dataset {
        serde_json::from_value(json!({
            "info": {},
            "images": [],
            "annotations": [
                {"id": 1, "image_id": 1, "category_id": 2, "bbox": [20, 20, 40, 30]},
                {"id": 2, "image_id": 404, "category_id": 2, "bbox": [0, 0, 5, 5]},
                {"id": 3, "image_id": 2, "category_id": 5, "bbox": [10, 10, 30, 30]}
            ],
            "categories": []
        }))
        .unwrap()
    }

    fn pipeline(dir: &Path, seed: u64) -> ParallelPipeline {
        let config = AugmentConfig {
            output_width: 96,
            output_height: 72,
            image_extension: "png".into(),
            ..AugmentConfig::default()
        };
        let catalog = PolicyCatalog::new([2], config.policy_params());
        ParallelPipeline::new(
            Arc::new(catalog),
            ImageDirectory::from_config(dir, &config),
            IdAllocator::new(50, 60),
            3,
            seed,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ids_are_assigned_in_annotation_order() {
        let dir = tempfile::tempdir().unwrap();
        for id in [1u64, 2] {
            let image = RgbImage::from_fn(100, 80, |x, y| Rgb([x as u8, y as u8, 7]));
            image_helper::save(&dir.path().join(format!("{id:06}.png")), &image).unwrap();
        }

        let mut p = pipeline(dir.path(), 17);
        let out = p.run(&dataset(), 5).await.unwrap();

        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].annotation_id, 2);
        assert_eq!(out.stats.attempts, 10);
        assert_eq!(out.stats.accepted as usize, out.len());

        for (i, sample) in out.samples.iter().enumerate() {
            assert_eq!(sample.annotation.id, 50 + i as u64);
            assert_eq!(sample.annotation.image_id, 60 + i as u64);
        }
        let sources: Vec<_> = out.samples.iter().map(|s| s.source_annotation_id).collect();
        let mut sorted = sources.clone();
        sorted.sort();
        assert_eq!(sources, sorted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_seed_gives_same_boxes() {
        let dir = tempfile::tempdir().unwrap();
        for id in [1u64, 2] {
            let image = RgbImage::from_fn(100, 80, |x, y| Rgb([x as u8, y as u8, 7]));
            image_helper::save(&dir.path().join(format!("{id:06}.png")), &image).unwrap();
        }

        let first = pipeline(dir.path(), 99).run(&dataset(), 4).await.unwrap();
        let second = pipeline(dir.path(), 99).run(&dataset(), 4).await.unwrap();
        let boxes = |g: &GeneratedSamples| g.samples.iter().map(|s| s.annotation.bbox).collect::<Vec<_>>();
        assert_eq!(boxes(&first), boxes(&second));
    }

    #[test]
    fn task_seeds_differ_per_annotation() {
        assert_ne!(task_seed(1, 0), task_seed(1, 1));
        assert_eq!(task_seed(1, 3), task_seed(1, 3));
    }
}

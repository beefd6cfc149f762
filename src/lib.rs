// THEORY:
// This file is the entry point of the `coco_augment` library crate. It exposes the
// two drivers (`pipeline::AugmentationPipeline` and the worker-pool based
// `parallel_pipeline::ParallelPipeline`), the dataset writer, and the configuration
// that ties them together. The binary in `main.rs` is a thin CLI over this API.
//
// The lower layers live in `core_modules`: bounding-box geometry, the dataset
// model, the individual transform operations, the policy catalog that assembles
// them, the executor that applies a policy while tracking object visibility, and
// the identifier allocator.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod logging;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::{AugmentConfig, DimensionMode, OutputMode, OutputPaths};
pub use core_modules::dataset::Dataset;
pub use core_modules::writer::DatasetWriter;
pub use error::{AugmentError, Result};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{AugmentationPipeline, GeneratedSamples, RunOutcome};

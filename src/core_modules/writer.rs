// THEORY:
// The `writer` module is the last stage of a run: it turns generated samples into
// files and merges their records into the source dataset.
//
// Key architectural principles:
// 1.  **Order-Based Names**: Generated samples are saved as `new{n}.jpg`, numbered
//     in generation order. Numbering starts after the highest `new{n}.jpg` already
//     referenced by the source dataset, so extending a dataset that an earlier run
//     produced never overwrites an image an existing record points to.
// 2.  **Append-Only Merge**: `images` and `annotations` are the source lists with
//     the new records appended; `info`, `categories` and any other top-level
//     sections are copied without being looked at.
// 3.  **Nominal vs Measured Size**: By default every new image record carries the
//     dataset's nominal resolution. `DimensionMode::Measured` records the actual
//     size of the saved image instead.
// 4.  **Non-Atomic Images**: Images are written one by one before the merged JSON.
//     If a later write fails, the images already saved stay on disk; the merged
//     JSON itself is only ever replaced as a whole.

use crate::config::{AugmentConfig, DimensionMode, OutputPaths};
use crate::core_modules::dataset::{Annotation, Dataset, ImageRecord};
use crate::core_modules::utils::image_helper::image_helper;
use crate::error::{AugmentError, Result};
use crate::pipeline::GeneratedSamples;
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

/// What was written to disk.
#[derive(Debug, Clone)]
pub struct PersistedDataset {
    pub dataset: Dataset,
    pub annotations_path: PathBuf,
    pub image_files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DatasetWriter {
    dimension_mode: DimensionMode,
    nominal_width: u32,
    nominal_height: u32,
}

impl DatasetWriter {
    pub fn new(dimension_mode: DimensionMode, nominal_width: u32, nominal_height: u32) -> Self {
        Self {
            dimension_mode,
            nominal_width,
            nominal_height,
        }
    }

    pub fn from_config(config: &AugmentConfig) -> Self {
        Self::new(config.dimension_mode, config.output_width, config.output_height)
    }

    pub fn generated_file_name(index: usize) -> String {
        format!("new{index}.jpg")
    }

    /// First `new{n}.jpg` index not referenced by any image record of `source`.
    pub fn first_free_index(source: &Dataset) -> usize {
        source
            .images
            .iter()
            .filter_map(|record| record.get("file_name").and_then(Value::as_str))
            .filter_map(|name| name.strip_prefix("new")?.strip_suffix(".jpg")?.parse::<usize>().ok())
            .map(|n| n + 1)
            .max()
            .unwrap_or(0)
    }

    /// Saves every generated image, numbering from `first_index`, and builds its metadata record.
    pub fn write_images(
        &self,
        generated: &GeneratedSamples,
        paths: &OutputPaths,
        first_index: usize,
    ) -> Result<(Vec<ImageRecord>, Vec<PathBuf>)> {
        let mut records = Vec::with_capacity(generated.len());
        let mut files = Vec::with_capacity(generated.len());

        for (offset, sample) in generated.samples.iter().enumerate() {
            let file_name = Self::generated_file_name(first_index + offset);
            let path = paths.images.join(&file_name);
            image_helper::save(&path, &sample.image)?;

            let (width, height) = match self.dimension_mode {
                DimensionMode::Nominal => (self.nominal_width, self.nominal_height),
                DimensionMode::Measured => sample.image.dimensions(),
            };
            records.push(ImageRecord {
                id: sample.annotation.image_id,
                width,
                height,
                file_name,
            });
            files.push(path);
        }

        Ok((records, files))
    }

    /// Appends new records to a copy of `source`.
    pub fn merge(source: &Dataset, images: &[ImageRecord], annotations: &[Annotation]) -> Result<Dataset> {
        let mut merged = source.clone();
        for record in images {
            merged
                .images
                .push(serde_json::to_value(record).map_err(AugmentError::Serialize)?);
        }
        for record in annotations {
            merged
                .annotations
                .push(serde_json::to_value(record).map_err(AugmentError::Serialize)?);
        }
        Ok(merged)
    }

    /// Persists images, merges records and writes the merged dataset file.
    pub fn write(&self, generated: &GeneratedSamples, source: &Dataset, paths: &OutputPaths) -> Result<PersistedDataset> {
        paths.prepare()?;
        let first_index = Self::first_free_index(source);
        let (images, image_files) = self.write_images(generated, paths, first_index)?;
        let annotations: Vec<Annotation> = generated.samples.iter().map(|s| s.annotation.clone()).collect();

        let dataset = Self::merge(source, &images, &annotations)?;
        dataset.save(&paths.annotations)?;

        info!(
            path = %paths.annotations.display(),
            new_images = images.len(),
            first_index,
            total_annotations = dataset.annotations.len(),
            "merged dataset written"
        );
        Ok(PersistedDataset {
            dataset,
            annotations_path: paths.annotations.clone(),
            image_files,
        })
    }
}

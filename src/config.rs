// THEORY:
// Everything tunable about a run lives in `AugmentConfig`. It can be loaded from a
// TOML file, every field has a default matching the dataset this tool was first
// built for, and the CLI overrides individual fields on top.
//
// Validation happens in two steps. `validate` checks the values on their own;
// `validate_against` checks them against the source dataset, most importantly
// that the id bases cannot collide with ids already in the file. Both run before
// any image is read or written.

use crate::core_modules::dataset::Dataset;
use crate::core_modules::policy::{DEFAULT_MIN_VISIBILITY, PolicyParams};
use crate::error::{AugmentError, IdSpace, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the merged dataset and the generated images go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Overwrite the source annotation file and write images next to the sources.
    InPlace,
    /// Write `<name>_new.json` and a sibling `<images>_new/` directory.
    Separate,
}

/// Which width/height go into the `images` records of generated samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionMode {
    /// The fixed dataset resolution (`output_width` x `output_height`).
    Nominal,
    /// The real size of each generated image.
    Measured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AugmentConfig {
    /// Minimum share of the original box that must stay visible.
    pub min_visibility: f64,
    /// Transform attempts per source annotation.
    pub repetitions: u32,
    /// First image id handed out to generated images.
    pub image_id_base: u64,
    /// First annotation id handed out to generated annotations.
    pub annotation_id_base: u64,
    pub output_mode: OutputMode,
    /// Categories whose meaning depends on orientation.
    pub no_flip_categories: Vec<u32>,
    pub output_width: u32,
    pub output_height: u32,
    pub dimension_mode: DimensionMode,
    /// Zero padding of source image names (`000042.jpg`).
    pub image_name_width: usize,
    pub image_extension: String,
    /// Fixed seed for reproducible runs.
    pub seed: Option<u64>,
    /// Run annotations on a worker pool.
    pub parallel: bool,
    /// Worker count for the pool; defaults to the number of CPUs.
    pub workers: Option<usize>,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            min_visibility: DEFAULT_MIN_VISIBILITY,
            repetitions: 20,
            image_id_base: 1258,
            annotation_id_base: 1257,
            output_mode: OutputMode::Separate,
            no_flip_categories: vec![2, 11, 12],
            output_width: 640,
            output_height: 480,
            dimension_mode: DimensionMode::Nominal,
            image_name_width: 6,
            image_extension: "jpg".to_string(),
            seed: None,
            parallel: false,
            workers: None,
        }
    }
}

impl AugmentConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AugmentError::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| AugmentError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Checks the values on their own.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_visibility > 0.0 && self.min_visibility <= 1.0) {
            return Err(AugmentError::Config(format!(
                "min_visibility must be in (0, 1], got {}",
                self.min_visibility
            )));
        }
        if self.repetitions == 0 {
            return Err(AugmentError::Config("repetitions must be at least 1".into()));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return Err(AugmentError::Config(format!(
                "output size must be non-zero, got {}x{}",
                self.output_width, self.output_height
            )));
        }
        if self.image_extension.is_empty() {
            return Err(AugmentError::Config("image_extension must not be empty".into()));
        }
        if self.workers == Some(0) {
            return Err(AugmentError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Checks that the id bases sit above every id already in `dataset`.
    pub fn validate_against(&self, dataset: &Dataset) -> Result<()> {
        if let Some(max_existing) = dataset.max_image_id()? {
            if self.image_id_base <= max_existing {
                return Err(AugmentError::IdCollision {
                    space: IdSpace::Image,
                    base: self.image_id_base,
                    max_existing,
                });
            }
        }
        if let Some(max_existing) = dataset.max_annotation_id()? {
            if self.annotation_id_base <= max_existing {
                return Err(AugmentError::IdCollision {
                    space: IdSpace::Annotation,
                    base: self.annotation_id_base,
                    max_existing,
                });
            }
        }
        Ok(())
    }

    pub fn policy_params(&self) -> PolicyParams {
        PolicyParams {
            crop_width: self.output_width,
            crop_height: self.output_height,
            min_visibility: self.min_visibility,
        }
    }
}

/// Resolved output locations of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub annotations: PathBuf,
    pub images: PathBuf,
}

impl OutputPaths {
    pub fn resolve(mode: OutputMode, source_annotations: &Path, source_images: &Path) -> Self {
        match mode {
            OutputMode::InPlace => Self {
                annotations: source_annotations.to_path_buf(),
                images: source_images.to_path_buf(),
            },
            OutputMode::Separate => {
                let stem = source_annotations
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "annotations".to_string());
                let dir_name = source_images
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "images".to_string());
                Self {
                    annotations: source_annotations.with_file_name(format!("{stem}_new.json")),
                    images: source_images.with_file_name(format!("{dir_name}_new")),
                }
            }
        }
    }

    /// Creates the output directories up front so a bad path fails the run early.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.images).map_err(|e| AugmentError::io(&self.images, e))?;
        if let Some(parent) = self.annotations.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| AugmentError::io(parent, e))?;
        }
        Ok(())
    }
}

// THEORY:
// The `dataset` module is the persistence boundary of the augmenter. A COCO-like
// annotation file is read once at the start of a run and a merged copy is written
// once at the end.
//
// Key architectural principles:
// 1.  **Verbatim Preservation**: Source records are kept as raw JSON values. The
//     merge must never reformat an existing record (integer boxes stay integers,
//     unknown keys such as `area` or `iscrowd` survive, key order is kept), so the
//     typed structs are only *views* parsed on demand.
// 2.  **Typed New Records**: Everything the augmenter creates is built from the
//     typed `ImageRecord` / `Annotation` structs and only then turned into JSON.
// 3.  **Whole-File Writes**: The merged file is written to a sibling temporary file
//     and renamed into place, so a failed write never leaves half a dataset behind.

use crate::core_modules::bbox::BBox;
use crate::error::{AugmentError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Metadata for one image file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub file_name: String,
}

/// One labeled object instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u32,
    pub bbox: BBox,
}

#[derive(Deserialize)]
struct IdOnly {
    id: u64,
}

/// The persisted annotation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Opaque, copied verbatim.
    pub info: Value,
    pub images: Vec<Value>,
    pub annotations: Vec<Value>,
    /// Opaque, copied verbatim.
    pub categories: Value,
    /// Any other top-level sections (`licenses`, ...), also copied verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dataset {
    /// Reads a dataset from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| AugmentError::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| AugmentError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the dataset as 2-space indented JSON, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let file = File::create(&tmp_path).map_err(|e| AugmentError::io(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| AugmentError::Json {
            path: tmp_path.clone(),
            source,
        })?;
        writer.flush().map_err(|e| AugmentError::io(&tmp_path, e))?;
        drop(writer);

        fs::rename(&tmp_path, path).map_err(|e| AugmentError::io(path, e))
    }

    /// Typed view of every annotation, in file order.
    pub fn parse_annotations(&self) -> Result<Vec<Annotation>> {
        parse_section(&self.annotations, "annotations")
    }

    /// Typed view of every image record, in file order.
    pub fn parse_images(&self) -> Result<Vec<ImageRecord>> {
        parse_section(&self.images, "images")
    }

    /// Largest image id in the dataset, if any.
    pub fn max_image_id(&self) -> Result<Option<u64>> {
        max_id(&self.images, "images")
    }

    /// Largest annotation id in the dataset, if any.
    pub fn max_annotation_id(&self) -> Result<Option<u64>> {
        max_id(&self.annotations, "annotations")
    }
}

fn parse_section<T: DeserializeOwned>(records: &[Value], section: &'static str) -> Result<Vec<T>> {
    records
        .iter()
        .enumerate()
        .map(|(index, value)| {
            T::deserialize(value).map_err(|source| AugmentError::MalformedRecord {
                section,
                index,
                source,
            })
        })
        .collect()
}

fn max_id(records: &[Value], section: &'static str) -> Result<Option<u64>> {
    let ids: Vec<IdOnly> = parse_section(records, section)?;
    Ok(ids.into_iter().map(|r| r.id).max())
}

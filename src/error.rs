// THEORY:
// Errors are split along the propagation policy of the augmenter. Anything in
// `AugmentError` is a dataset-level or per-annotation failure that travels up with
// `?`. A transform that loses the labeled object is not an error at all: it is a
// `Rejection` (see `core_modules::transform`) and never leaves the driver loop.

use std::path::PathBuf;
use thiserror::Error;

/// Which identifier space an id collision was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    Image,
    Annotation,
}

impl std::fmt::Display for IdSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdSpace::Image => write!(f, "image"),
            IdSpace::Annotation => write!(f, "annotation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AugmentError {
    /// Filesystem failure on a specific path.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The dataset file could not be parsed or serialized.
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An image could not be decoded or encoded.
    #[error("image error on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A record inside `images` or `annotations` does not match the expected schema.
    #[error("malformed {section} record at index {index}: {source}")]
    MalformedRecord {
        section: &'static str,
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize generated record: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The configured id base would reuse an id already present in the source dataset.
    #[error("{space} id base {base} collides with existing {space} id {max_existing}; the base must be greater")]
    IdCollision {
        space: IdSpace,
        base: u64,
        max_existing: u64,
    },

    #[error("worker failure: {0}")]
    Worker(String),
}

impl AugmentError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AugmentError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        AugmentError::Image {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, AugmentError>;

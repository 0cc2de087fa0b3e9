//! Error types shared by the refinement core and its I/O adapters.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading, refining or persisting a case.
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read NIfTI volume: {0}")]
    Nifti(String),

    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    /// A mask whose extent, spacing or affine disagrees with the case grid.
    #[error("geometry mismatch for '{organ}': {detail}")]
    GeometryMismatch { organ: String, detail: String },

    #[error("voxel {index} holds label {label}, which is not registered for this case")]
    InvalidLabel { index: usize, label: u8 },

    #[error("{count} organs present, at most 255 labels fit a uint8 volume")]
    TooManyOrgans { count: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no organ masks found in '{0}'")]
    NoMasks(PathBuf),
}

impl RefineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RefineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error came from mismatched grids rather than I/O.
    pub fn is_geometry_mismatch(&self) -> bool {
        matches!(self, RefineError::GeometryMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, RefineError>;

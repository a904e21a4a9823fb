//! Error types for the HGT library.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::coord::TileKey;

/// Errors that can occur when reading tiles or querying a tile set.
///
/// The type is `Clone` so that a single failed load can be handed to every
/// query waiting on it; I/O errors are shared behind an [`Arc`].
#[derive(Error, Debug, Clone)]
pub enum SrtmError {
    /// The file could not be opened, mapped, listed or extracted.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// File size doesn't match SRTM1 or SRTM3 format.
    #[error("Invalid file size for {path}: {size} bytes (expected 25934402 for SRTM1 or 2884802 for SRTM3)")]
    InvalidFileSize { path: PathBuf, size: usize },

    /// The coordinate maps outside the tile's `[0, size]` grid range.
    #[error("Coordinates outside tile bounds: lat={lat}, lng={lng} (row={row}, col={col}; size={size})")]
    OutOfBounds {
        lat: f64,
        lng: f64,
        row: f64,
        col: f64,
        size: usize,
    },

    /// The coordinate is NaN or infinite.
    #[error("Invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    /// A raw sample read was given an index outside the grid.
    #[error("Sample index out of range: row={row}, col={col} (grid size {grid_size})")]
    InvalidSampleIndex {
        row: usize,
        col: usize,
        grid_size: usize,
    },

    /// No backing file exists for the requested degree cell.
    #[error("Tile does not exist: {path}")]
    TileNotFound { path: PathBuf },

    /// The background task opening a tile panicked or was cancelled.
    #[error("Loading tile {key} failed: {message}")]
    LoadTaskFailed { key: TileKey, message: String },

    /// A configuration value could not be used.
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl SrtmError {
    /// Wrap an I/O error together with the path it happened on.
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        SrtmError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    /// Returns true if the error means the tile simply isn't available.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SrtmError::TileNotFound { .. })
    }
}

/// Result type alias using [`SrtmError`].
pub type Result<T> = std::result::Result<T, SrtmError>;

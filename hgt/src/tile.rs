//! SRTM tile parsing and elevation extraction.
//!
//! This module provides the [`Tile`] struct for reading SRTM `.hgt` files
//! and extracting elevation data at specific coordinates.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::coord::Coordinate;
use crate::error::{Result, SrtmError};
use crate::interpolation::{Grid, Interpolation, Interpolator, SampleSource};

/// File size for SRTM1 (1 arc-second, ~30m resolution): 3601 × 3601 × 2 bytes
const SRTM1_SIZE: usize = 3601 * 3601 * 2; // 25,934,402 bytes

/// File size for SRTM3 (3 arc-second, ~90m resolution): 1201 × 1201 × 2 bytes
const SRTM3_SIZE: usize = 1201 * 1201 * 2; // 2,884,802 bytes

/// Number of samples per row/column for SRTM1
const SRTM1_SAMPLES: usize = 3601;

/// Number of samples per row/column for SRTM3
const SRTM3_SAMPLES: usize = 1201;

/// Value indicating no data (void) in SRTM files
pub const VOID_VALUE: i16 = -32768;

/// Resolution type of an SRTM tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtmResolution {
    /// SRTM1: 1 arc-second (~30m) resolution
    Srtm1,
    /// SRTM3: 3 arc-second (~90m) resolution
    Srtm3,
}

impl SrtmResolution {
    /// Detect the resolution from a file's byte length.
    pub fn from_file_size(size: usize) -> Option<Self> {
        match size {
            SRTM1_SIZE => Some(SrtmResolution::Srtm1),
            SRTM3_SIZE => Some(SrtmResolution::Srtm3),
            _ => None,
        }
    }

    /// Returns the number of samples per row/column for this resolution.
    pub fn samples(&self) -> usize {
        match self {
            SrtmResolution::Srtm1 => SRTM1_SAMPLES,
            SrtmResolution::Srtm3 => SRTM3_SAMPLES,
        }
    }

    /// Grid spacing in arc-seconds.
    pub fn arc_seconds(&self) -> u32 {
        match self {
            SrtmResolution::Srtm1 => 1,
            SrtmResolution::Srtm3 => 3,
        }
    }

    /// Returns the approximate resolution in meters.
    pub fn meters(&self) -> f64 {
        match self {
            SrtmResolution::Srtm1 => 30.0,
            SrtmResolution::Srtm3 => 90.0,
        }
    }

    /// Expected file size in bytes.
    pub fn file_size(&self) -> usize {
        match self {
            SrtmResolution::Srtm1 => SRTM1_SIZE,
            SrtmResolution::Srtm3 => SRTM3_SIZE,
        }
    }
}

/// A memory-mapped SRTM tile covering one degree cell.
///
/// The mapping is owned by the tile and released when it is dropped or
/// [destroyed](Tile::destroy). Tiles are immutable once opened and can be
/// shared across threads behind an [`Arc`](std::sync::Arc).
///
/// # Example
///
/// ```ignore
/// use hgt::{Coordinate, Tile};
///
/// let tile = Tile::open("N35E138.hgt", Coordinate::new(35.0, 138.0))?;
/// let elevation = tile.get_elevation(Coordinate::new(35.5, 138.5))?;
/// println!("Elevation: {}m", elevation);
/// ```
pub struct Tile {
    /// Memory-mapped file data
    data: Mmap,
    path: PathBuf,
    south_west: Coordinate,
    resolution: SrtmResolution,
    interpolation: Interpolation,
}

impl Tile {
    /// Open and map a tile using bilinear interpolation.
    ///
    /// The resolution (SRTM1 vs SRTM3) is automatically detected from the file size.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened or memory-mapped
    /// - The file size doesn't match SRTM1 or SRTM3 format
    pub fn open<P: AsRef<Path>>(path: P, south_west: impl Into<Coordinate>) -> Result<Self> {
        Self::open_with(path, south_west, Interpolation::default())
    }

    /// Open and map a tile with an explicit interpolation.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        south_west: impl Into<Coordinate>,
        interpolation: Interpolation,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SrtmError::io(path, e))?;

        // SAFETY: Memory mapping is safe as long as the file is not modified
        // while mapped. We open the file read-only and only expose reads.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| SrtmError::io(path, e))?;

        let resolution = SrtmResolution::from_file_size(mmap.len()).ok_or_else(|| {
            SrtmError::InvalidFileSize {
                path: path.to_path_buf(),
                size: mmap.len(),
            }
        })?;

        tracing::debug!(
            path = %path.display(),
            arc_seconds = resolution.arc_seconds(),
            %interpolation,
            "Mapped tile"
        );

        Ok(Self {
            data: mmap,
            path: path.to_path_buf(),
            south_west: south_west.into(),
            resolution,
            interpolation,
        })
    }

    fn grid(&self) -> Grid<'_> {
        Grid::from_checked(&self.data, self.resolution.samples())
    }

    /// Get the elevation at the specified coordinate.
    ///
    /// The coordinate must lie inside the tile's own closed one-degree cell;
    /// the north and east edges are included.
    ///
    /// # Errors
    ///
    /// Returns [`SrtmError::OutOfBounds`] if the coordinate falls outside the tile.
    pub fn get_elevation(&self, coord: impl Into<Coordinate>) -> Result<f64> {
        let coord = coord.into();
        let size = self.resolution.samples() - 1;
        let extent = size as f64;

        let row = (coord.lat - self.south_west.lat) * extent;
        let col = (coord.lng - self.south_west.lng) * extent;

        // NaN fails both range checks
        if !(0.0..=extent).contains(&row) || !(0.0..=extent).contains(&col) {
            return Err(SrtmError::OutOfBounds {
                lat: coord.lat,
                lng: coord.lng,
                row,
                col,
                size,
            });
        }

        Ok(self.interpolation.interpolate(&self.grid(), row, col))
    }

    /// Raw sample at logical `(row, col)`; row 0 is the south edge.
    ///
    /// # Errors
    ///
    /// Returns [`SrtmError::InvalidSampleIndex`] unless both indices are in
    /// `0..grid_size()`.
    pub fn sample(&self, row: usize, col: usize) -> Result<i16> {
        let grid_size = self.grid_size();
        if row >= grid_size || col >= grid_size {
            return Err(SrtmError::InvalidSampleIndex {
                row,
                col,
                grid_size,
            });
        }

        Ok(self.grid().sample(row, col))
    }

    /// Release the mapping.
    pub fn destroy(self) {
        tracing::debug!(path = %self.path.display(), "Unmapping tile");
        drop(self);
    }

    /// Returns the resolution of this tile.
    pub fn resolution(&self) -> SrtmResolution {
        self.resolution
    }

    /// Returns the number of samples per row/column.
    pub fn grid_size(&self) -> usize {
        self.resolution.samples()
    }

    /// Southwest corner of the tile.
    pub fn south_west(&self) -> Coordinate {
        self.south_west
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// Path of the mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("path", &self.path)
            .field("south_west", &self.south_west)
            .field("resolution", &self.resolution)
            .field("interpolation", &self.interpolation)
            .finish()
    }
}

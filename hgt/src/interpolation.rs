//! Sample access and interpolation strategies.
//!
//! A [`SampleSource`] exposes the raw grid; an [`Interpolator`] turns a
//! fractional `(row, col)` position into an elevation. Row 0 is the tile's
//! **south** edge and column 0 its west edge in this logical numbering; the
//! north-first storage order is handled entirely by the source.

use std::fmt;
use std::str::FromStr;

use crate::error::SrtmError;

/// Read access to a square grid of elevation samples.
pub trait SampleSource {
    /// Number of samples per row/column.
    fn grid_size(&self) -> usize;

    /// Sample at logical `(row, col)`, both in `0..grid_size()`.
    ///
    /// Callers must keep indices in range; passing `grid_size()` itself is a
    /// logic error and panics.
    fn sample(&self, row: usize, col: usize) -> i16;
}

/// A borrowed big-endian `i16` grid stored north row first.
#[derive(Debug, Clone, Copy)]
pub struct Grid<'a> {
    data: &'a [u8],
    size: usize,
}

impl<'a> Grid<'a> {
    /// Wrap `data` as a `size × size` grid.
    ///
    /// Returns `None` unless `data` holds exactly `size * size` samples.
    pub fn new(data: &'a [u8], size: usize) -> Option<Self> {
        (size > 0 && data.len() == size * size * 2).then_some(Self { data, size })
    }

    /// Wrap a buffer whose length was already validated against `size`.
    pub(crate) fn from_checked(data: &'a [u8], size: usize) -> Self {
        debug_assert_eq!(data.len(), size * size * 2);
        Self { data, size }
    }

    /// Byte offset of logical `(row, col)`.
    #[inline]
    pub fn offset(&self, row: usize, col: usize) -> usize {
        sample_offset(self.size, row, col)
    }
}

/// Byte offset of logical `(row, col)` in a `size × size` grid.
///
/// Storage runs north to south, so the row is inverted first.
#[inline]
pub(crate) fn sample_offset(size: usize, row: usize, col: usize) -> usize {
    ((size - row - 1) * size + col) * 2
}


impl SampleSource for Grid<'_> {
    #[inline]
    fn grid_size(&self) -> usize {
        self.size
    }

    #[inline]
    fn sample(&self, row: usize, col: usize) -> i16 {
        assert!(
            row < self.size && col < self.size,
            "sample ({row}, {col}) outside {0}x{0} grid",
            self.size
        );
        let offset = self.offset(row, col);
        i16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }
}

/// Maps a fractional grid position to an elevation.
///
/// `row` and `col` are already bounds-checked against `[0, grid_size - 1]`.
pub trait Interpolator {
    fn interpolate(&self, source: &dyn SampleSource, row: f64, col: f64) -> f64;
}

/// Returns the single closest sample.
///
/// Halfway positions round away from zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbor;

impl Interpolator for NearestNeighbor {
    fn interpolate(&self, source: &dyn SampleSource, row: f64, col: f64) -> f64 {
        let max = source.grid_size() - 1;
        let row = (row.round() as usize).min(max);
        let col = (col.round() as usize).min(max);

        source.sample(row, col) as f64
    }
}

/// Blends the four surrounding samples by fractional offset.
///
/// On the tile's north or east edge the upper neighbour index would be
/// `grid_size`; it is clamped to `grid_size - 1`. The fraction there is zero,
/// so the clamped sample carries no weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bilinear;

#[inline]
fn lerp(a: f64, b: f64, f: f64) -> f64 {
    a + (b - a) * f
}

impl Interpolator for Bilinear {
    fn interpolate(&self, source: &dyn SampleSource, row: f64, col: f64) -> f64 {
        let max = source.grid_size() - 1;

        let row_low = (row.floor() as usize).min(max);
        let row_hi = (row_low + 1).min(max);
        let row_frac = row - row_low as f64;

        let col_low = (col.floor() as usize).min(max);
        let col_hi = (col_low + 1).min(max);
        let col_frac = col - col_low as f64;

        let v00 = source.sample(row_low, col_low) as f64;
        let v10 = source.sample(row_low, col_hi) as f64;
        let v11 = source.sample(row_hi, col_hi) as f64;
        let v01 = source.sample(row_hi, col_low) as f64;

        let v1 = lerp(v00, v10, col_frac);
        let v2 = lerp(v01, v11, col_frac);

        lerp(v1, v2, row_frac)
    }
}

/// Interpolation selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Closest single sample.
    NearestNeighbor,
    /// Four-sample bilinear blend.
    #[default]
    Bilinear,
}

impl Interpolation {
    /// Configuration name, as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::NearestNeighbor => "nearest-neighbor",
            Interpolation::Bilinear => "bilinear",
        }
    }
}

impl Interpolator for Interpolation {
    fn interpolate(&self, source: &dyn SampleSource, row: f64, col: f64) -> f64 {
        match self {
            Interpolation::NearestNeighbor => NearestNeighbor.interpolate(source, row, col),
            Interpolation::Bilinear => Bilinear.interpolate(source, row, col),
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Interpolation {
    type Err = SrtmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nearest-neighbor" | "nearest-neighbour" | "nearest" => {
                Ok(Interpolation::NearestNeighbor)
            }
            "bilinear" => Ok(Interpolation::Bilinear),
            other => Err(SrtmError::Config {
                message: format!(
                    "unknown interpolation {other:?} (expected \"nearest-neighbor\" or \"bilinear\")"
                ),
            }),
        }
    }
}

//! Coordinates, degree-cell keys and bounding boxes.
//!
//! # Tile Keys
//!
//! Every tile covers one 1° × 1° cell and is named after its **southwest
//! corner**: `{N|S}{lat}{E|W}{lng}`.
//!
//! - Latitude: 2 digits with N/S prefix (e.g., N35, S12)
//! - Longitude: 3 digits with E/W prefix (e.g., E138, W077)
//!
//! Both components come from `floor`, so `-1.1` belongs to cell `S02`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A geographic position in decimal degrees.
///
/// Callers holding an ordered `(lat, lng)` pair or `[lat, lng]` array convert
/// it with [`From`]; the shape is fixed at compile time.
///
/// ```
/// use hgt::Coordinate;
///
/// let a = Coordinate::new(35.5, 138.7);
/// let b: Coordinate = (35.5, 138.7).into();
/// let c: Coordinate = [35.5, 138.7].into();
/// assert_eq!(a, b);
/// assert_eq!(b, c);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// The key of the degree cell containing this coordinate.
    pub fn tile_key(&self) -> TileKey {
        TileKey::from_coordinate(*self)
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self { lat, lng }
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from([lat, lng]: [f64; 2]) -> Self {
        Self { lat, lng }
    }
}

impl From<Coordinate> for (f64, f64) {
    fn from(c: Coordinate) -> Self {
        (c.lat, c.lng)
    }
}

/// Identifies a 1° × 1° cell by the integer degrees of its southwest corner.
///
/// Formats as `N37W122`, `S02E005`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Southwest corner latitude.
    pub lat: i32,
    /// Southwest corner longitude.
    pub lng: i32,
}

impl TileKey {
    pub const fn new(lat: i32, lng: i32) -> Self {
        Self { lat, lng }
    }

    /// Key of the cell containing `coord`.
    ///
    /// # Examples
    ///
    /// ```
    /// use hgt::{Coordinate, TileKey};
    ///
    /// assert_eq!(TileKey::from_coordinate(Coordinate::new(37.7, -122.4)).to_string(), "N37W123");
    /// assert_eq!(TileKey::from_coordinate(Coordinate::new(-1.1, 5.9)).to_string(), "S02E005");
    /// ```
    pub fn from_coordinate(coord: Coordinate) -> Self {
        Self {
            lat: coord.lat.floor() as i32,
            lng: coord.lng.floor() as i32,
        }
    }

    /// The cell's southwest corner as a coordinate.
    pub fn south_west(&self) -> Coordinate {
        Coordinate::new(self.lat as f64, self.lng as f64)
    }

    /// The conventional `.hgt` filename for this cell, e.g. `N35E138.hgt`.
    pub fn filename(&self) -> String {
        format!("{}.hgt", self)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lat_prefix = if self.lat >= 0 { 'N' } else { 'S' };
        let lng_prefix = if self.lng >= 0 { 'E' } else { 'W' };

        write!(
            f,
            "{}{:02}{}{:03}",
            lat_prefix,
            self.lat.unsigned_abs(),
            lng_prefix,
            self.lng.unsigned_abs()
        )
    }
}

/// Error returned when a string isn't a valid tile key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid tile key: {0:?}")]
pub struct ParseTileKeyError(String);

/// Strip `suffix` from the end of `s`, ignoring ASCII case.
pub(crate) fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    let (head, tail) = (s.get(..split)?, s.get(split..)?);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

impl FromStr for TileKey {
    type Err = ParseTileKeyError;

    /// Parse `N35E138`, `s12w077.HGT` or `/path/to/N00E000.hgt`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTileKeyError(s.to_string());

        // Extract just the filename if a path is given
        let name = s.rsplit(['/', '\\']).next().unwrap_or(s);
        let name = strip_suffix_ignore_case(name, ".hgt").unwrap_or(name);

        // Must be exactly 7 ASCII characters: N00E000
        if name.len() != 7 || !name.is_ascii() {
            return Err(err());
        }

        let lat_sign = match name.as_bytes()[0] {
            b'N' | b'n' => 1,
            b'S' | b's' => -1,
            _ => return Err(err()),
        };
        let lng_sign = match name.as_bytes()[3] {
            b'E' | b'e' => 1,
            b'W' | b'w' => -1,
            _ => return Err(err()),
        };

        let digits = |part: &str| -> Option<i32> {
            if part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse().ok()
            } else {
                None
            }
        };
        let lat = digits(&name[1..3]).ok_or_else(err)?;
        let lng = digits(&name[4..7]).ok_or_else(err)?;

        Ok(Self {
            lat: lat * lat_sign,
            lng: lng * lng_sign,
        })
    }
}

/// A geographic bounding box for filtering tiles during preload.
///
/// Coordinates are in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum latitude (southern boundary).
    pub min_lat: f64,
    /// Minimum longitude (western boundary).
    pub min_lng: f64,
    /// Maximum latitude (northern boundary).
    pub max_lat: f64,
    /// Maximum longitude (eastern boundary).
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    /// Check if this bounding box overlaps with a tile.
    ///
    /// The tile is treated as `[lat, lat+1) × [lng, lng+1)`.
    pub fn overlaps_tile(&self, key: TileKey) -> bool {
        let tile_max_lat = (key.lat + 1) as f64;
        let tile_max_lng = (key.lng + 1) as f64;

        self.min_lat < tile_max_lat
            && self.max_lat > key.lat as f64
            && self.min_lng < tile_max_lng
            && self.max_lng > key.lng as f64
    }
}

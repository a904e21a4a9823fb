//! # HGT - SRTM Elevation Library
//!
//! Library for querying elevation data from SRTM (Shuttle Radar Topography
//! Mission) `.hgt` files through memory-mapped tiles.
//!
//! ## Features
//!
//! - **Fast**: Memory-mapped I/O, no parsing step
//! - **Lazy**: Tiles load on first query and stay resident
//! - **Load Once**: Concurrent queries for one tile share a single load
//! - **Automatic Detection**: Determines tile resolution (SRTM1/SRTM3) from file size
//! - **Pluggable**: Bring your own [`TileLoader`] or [`Interpolator`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use hgt::TileSet;
//!
//! let tiles = TileSet::new("/data/srtm");
//!
//! // Loads N35E138.hgt on first use
//! let elevation = tiles.get_elevation((35.3606, 138.7274)).await?;
//! println!("Elevation: {:.1}m", elevation);
//! ```
//!
//! A single file can also be used directly:
//!
//! ```ignore
//! use hgt::Tile;
//!
//! let tile = Tile::open("/data/srtm/N35E138.hgt", (35.0, 138.0))?;
//! let elevation = tile.get_elevation((35.5, 138.5))?;
//! ```
//!
//! ## SRTM Data Format
//!
//! - **SRTM1**: 3601×3601 samples, 1 arc-second (~30m) resolution
//! - **SRTM3**: 1201×1201 samples, 3 arc-second (~90m) resolution
//!
//! Each sample is a 16-bit big-endian signed integer in meters, stored north
//! row first. The value -32768 marks a void and is returned unchanged.
//!
//! ## Data Sources
//!
//! Download SRTM data from:
//! - <https://dwtkns.com/srtm30m/>
//! - <https://earthexplorer.usgs.gov/>

pub mod coord;
pub mod error;
pub mod interpolation;
pub mod loader;
pub mod tile;
pub mod tileset;

// Re-export main types at crate root for convenience
pub use coord::{BoundingBox, Coordinate, ParseTileKeyError, TileKey};
pub use error::{Result, SrtmError};
pub use interpolation::{Bilinear, Grid, Interpolation, Interpolator, NearestNeighbor, SampleSource};
pub use loader::{FsTileLoader, TileLoader, ZipTileLoader};
pub use tile::{SrtmResolution, Tile, VOID_VALUE};
pub use tileset::{parse_preload_bounds, CacheStats, PreloadStats, TileSet, TileSetBuilder};

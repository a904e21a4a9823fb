//! Tile loaders used by [`TileSet`](crate::TileSet).
//!
//! A loader turns a [`TileKey`] into an opened [`Tile`]. The default
//! [`FsTileLoader`] maps `<dir>/<key>.hgt`; [`ZipTileLoader`] additionally
//! unpacks `<key>.hgt.zip` archives on first use. Anything implementing
//! [`TileLoader`] can be plugged in through
//! [`TileSetBuilder::loader`](crate::TileSetBuilder::loader).

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::coord::TileKey;
use crate::error::{Result, SrtmError};
use crate::interpolation::Interpolation;
use crate::tile::Tile;

/// Asynchronously produces the tile for a degree cell.
#[async_trait]
pub trait TileLoader: Send + Sync {
    /// Load the tile for `key` from `tile_dir`.
    ///
    /// A missing tile should be reported as [`SrtmError::TileNotFound`].
    async fn load_tile(&self, tile_dir: &Path, key: TileKey) -> Result<Tile>;
}

/// Open a tile on the blocking pool.
async fn open_blocking(path: PathBuf, key: TileKey, interpolation: Interpolation) -> Result<Tile> {
    tokio::task::spawn_blocking(move || Tile::open_with(&path, key.south_west(), interpolation))
        .await
        .map_err(|e| SrtmError::LoadTaskFailed {
            key,
            message: e.to_string(),
        })?
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| SrtmError::io(path, e))
}

/// Loads `<tile_dir>/<key>.hgt` from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsTileLoader {
    interpolation: Interpolation,
}

impl FsTileLoader {
    /// Loader whose tiles use `interpolation`.
    pub fn new(interpolation: Interpolation) -> Self {
        Self { interpolation }
    }
}

#[async_trait]
impl TileLoader for FsTileLoader {
    async fn load_tile(&self, tile_dir: &Path, key: TileKey) -> Result<Tile> {
        let path = tile_dir.join(key.filename());

        if !exists(&path).await? {
            return Err(SrtmError::TileNotFound { path });
        }

        open_blocking(path, key, self.interpolation).await
    }
}

/// Like [`FsTileLoader`], but falls back to extracting `<key>.hgt.zip`.
///
/// The extracted `.hgt` is written next to the archive, so later loads map
/// it directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipTileLoader {
    interpolation: Interpolation,
}

impl ZipTileLoader {
    pub fn new(interpolation: Interpolation) -> Self {
        Self { interpolation }
    }
}

#[async_trait]
impl TileLoader for ZipTileLoader {
    async fn load_tile(&self, tile_dir: &Path, key: TileKey) -> Result<Tile> {
        let filename = key.filename();
        let path = tile_dir.join(&filename);

        if !exists(&path).await? {
            let zip_path = tile_dir.join(format!("{}.zip", filename));
            if !exists(&zip_path).await? {
                return Err(SrtmError::TileNotFound { path });
            }

            let out_path = path.clone();
            tokio::task::spawn_blocking(move || extract_hgt_from_zip(&zip_path, &out_path))
                .await
                .map_err(|e| SrtmError::LoadTaskFailed {
                    key,
                    message: e.to_string(),
                })??;

            tracing::debug!(tile = %key, path = %path.display(), "Extracted tile archive");
        }

        open_blocking(path, key, self.interpolation).await
    }
}

/// Extract the first `.hgt` entry of `zip_path` to `out_path`.
fn extract_hgt_from_zip(zip_path: &Path, out_path: &Path) -> Result<()> {
    let invalid = |e: zip::result::ZipError| {
        SrtmError::io(zip_path, std::io::Error::new(ErrorKind::InvalidData, e))
    };

    let file = File::open(zip_path).map_err(|e| SrtmError::io(zip_path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(invalid)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(invalid)?;
        if !entry.name().to_lowercase().ends_with(".hgt") {
            continue;
        }

        // Write to a sibling temp name first so a half-written file is never mapped
        let partial = out_path.with_extension("hgt.part");
        let written = File::create(&partial)
            .and_then(|mut out_file| std::io::copy(&mut entry, &mut out_file))
            .map_err(|e| SrtmError::io(&partial, e))
            .and_then(|_| {
                std::fs::rename(&partial, out_path).map_err(|e| SrtmError::io(out_path, e))
            });

        if written.is_err() {
            if let Err(e) = std::fs::remove_file(&partial) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        path = %partial.display(),
                        error = %e,
                        "Could not remove partial extract"
                    );
                }
            }
        }

        return written;
    }

    Err(SrtmError::io(
        zip_path,
        std::io::Error::new(
            ErrorKind::NotFound,
            format!("No .hgt file found in {}", zip_path.display()),
        ),
    ))
}

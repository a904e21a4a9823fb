//! A lazily loaded set of tiles forming one query surface.
//!
//! This module provides [`TileSet`], which resolves each query to the degree
//! cell containing it, loads that cell's tile on first use and keeps it for
//! the lifetime of the set.
//!
//! # Loading
//!
//! Each cache slot is either `Loaded` or `Pending`. The first query for a
//! missing cell installs `Pending` and drives the loader; any query for the
//! same cell arriving meanwhile registers as a waiter on that slot and gets
//! the same outcome. At most one load per cell is ever in flight.
//!
//! Failed loads are not cached: the slot is removed, every waiter receives the
//! error, and the next query for the cell starts a fresh load.
//!
//! ```ignore
//! use hgt::TileSet;
//!
//! let tiles = TileSet::new("/data/srtm");
//! let elevation = tiles.get_elevation((35.3606, 138.7274)).await?;
//! println!("Elevation: {:.1}m", elevation);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::coord::{strip_suffix_ignore_case, BoundingBox, Coordinate, TileKey};
use crate::error::{Result, SrtmError};
use crate::interpolation::Interpolation;
use crate::loader::{FsTileLoader, TileLoader, ZipTileLoader};
use crate::tile::Tile;

type LoadOutcome = Result<Arc<Tile>>;

enum CacheEntry {
    /// A load is in flight; queries that arrived after it started wait here.
    Pending(Vec<oneshot::Sender<LoadOutcome>>),
    Loaded(Arc<Tile>),
}

type TileMap = Mutex<HashMap<TileKey, CacheEntry>>;

/// What a lookup found for a key that isn't resident.
enum Slot {
    Wait(oneshot::Receiver<LoadOutcome>),
    Load,
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of tiles currently resident.
    pub entry_count: u64,
    /// Number of loads currently in flight.
    pub pending_count: u64,
    /// Queries served by a resident tile.
    pub hit_count: u64,
    /// Queries that started a load.
    pub miss_count: u64,
    /// Queries that joined a load already in flight.
    pub wait_count: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count + self.wait_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Statistics from a preload operation.
#[derive(Debug, Clone, Default)]
pub struct PreloadStats {
    /// Number of tiles successfully loaded into cache.
    pub tiles_loaded: u64,
    /// Number of tiles that were already in cache.
    pub tiles_already_cached: u64,
    /// Number of tiles that failed to load.
    pub tiles_failed: u64,
    /// Number of tiles that matched the bounding box filter.
    pub tiles_matched: u64,
    /// Total elapsed time in milliseconds.
    pub elapsed_ms: u64,
}

/// Owns the tiles of one directory and answers elevation queries over them.
///
/// `TileSet` is `Send + Sync`; share it behind an [`Arc`] to query from many
/// tasks at once. Tiles are never evicted.
pub struct TileSet {
    /// Directory containing .hgt files.
    tile_dir: PathBuf,
    tiles: TileMap,
    loader: Box<dyn TileLoader>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    wait_count: AtomicU64,
}

impl TileSet {
    /// Tile set over `tile_dir` with the default filesystem loader and
    /// bilinear interpolation.
    pub fn new<P: AsRef<Path>>(tile_dir: P) -> Self {
        TileSetBuilder::new(tile_dir).build()
    }

    /// Create a builder for more configuration options.
    pub fn builder<P: AsRef<Path>>(tile_dir: P) -> TileSetBuilder {
        TileSetBuilder::new(tile_dir)
    }

    /// Get the elevation at `coord`, loading its tile if needed.
    ///
    /// # Errors
    ///
    /// - [`SrtmError::InvalidCoordinate`] for NaN or infinite input
    /// - [`SrtmError::TileNotFound`] if the cell has no backing file
    /// - any error raised while opening the tile
    pub async fn get_elevation(&self, coord: impl Into<Coordinate>) -> Result<f64> {
        let coord = coord.into();
        if !coord.lat.is_finite() || !coord.lng.is_finite() {
            return Err(SrtmError::InvalidCoordinate {
                lat: coord.lat,
                lng: coord.lng,
            });
        }

        let tile = self.tile(coord.tile_key()).await?;
        tile.get_elevation(coord)
    }

    /// Get elevations for a batch of coordinates.
    ///
    /// Each distinct tile is resolved once, regardless of how many
    /// coordinates fall within it, and distinct tiles load concurrently.
    /// Results keep the input order.
    pub async fn get_elevations<C>(&self, coords: &[C]) -> Vec<Result<f64>>
    where
        C: Into<Coordinate> + Copy,
    {
        let coords: Vec<Coordinate> = coords.iter().map(|&c| c.into()).collect();

        let is_valid = |c: &Coordinate| c.lat.is_finite() && c.lng.is_finite();

        let keys: BTreeSet<TileKey> = coords
            .iter()
            .filter(|c| is_valid(*c))
            .map(Coordinate::tile_key)
            .collect();

        let tiles: HashMap<TileKey, LoadOutcome> =
            join_all(keys.into_iter().map(|key| async move { (key, self.tile(key).await) }))
                .await
                .into_iter()
                .collect();

        coords
            .iter()
            .map(|coord| match tiles.get(&coord.tile_key()) {
                Some(Ok(tile)) if is_valid(coord) => tile.get_elevation(*coord),
                Some(Err(e)) if is_valid(coord) => Err(e.clone()),
                _ => Err(SrtmError::InvalidCoordinate {
                    lat: coord.lat,
                    lng: coord.lng,
                }),
            })
            .collect()
    }

    /// The tile for `key`, from cache or from a single shared load.
    pub async fn tile(&self, key: TileKey) -> Result<Arc<Tile>> {
        loop {
            let slot = {
                let mut tiles = self.tiles.lock();
                match tiles.get_mut(&key) {
                    Some(CacheEntry::Loaded(tile)) => {
                        self.hit_count.fetch_add(1, Ordering::Relaxed);
                        return Ok(Arc::clone(tile));
                    }
                    Some(CacheEntry::Pending(waiters)) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        Slot::Wait(rx)
                    }
                    None => {
                        tiles.insert(key, CacheEntry::Pending(Vec::new()));
                        Slot::Load
                    }
                }
            };

            let waiter = match slot {
                Slot::Load => return self.load(key).await,
                Slot::Wait(rx) => rx,
            };

            self.wait_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(tile = %key, "Waiting for in-flight load");

            match waiter.await {
                Ok(outcome) => return outcome,
                // The driving query was dropped before finishing; its slot is
                // gone, so go round again and start the load ourselves.
                Err(_) => {
                    tracing::debug!(tile = %key, "In-flight load abandoned, retrying");
                }
            }
        }
    }

    /// Drive the load for a slot this call just marked `Pending`.
    async fn load(&self, key: TileKey) -> LoadOutcome {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tile = %key, dir = %self.tile_dir.display(), "Loading tile");

        let pending = PendingLoad {
            tiles: &self.tiles,
            key,
            finished: false,
        };

        let start = Instant::now();
        let outcome = self.loader.load_tile(&self.tile_dir, key).await.map(Arc::new);

        match &outcome {
            Ok(tile) => tracing::info!(
                tile = %key,
                arc_seconds = tile.resolution().arc_seconds(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Tile loaded"
            ),
            Err(e) => tracing::warn!(tile = %key, error = %e, "Tile load failed"),
        }

        pending.finish(outcome)
    }

    /// Returns true if the tile for `key` is resident.
    pub fn is_cached(&self, key: TileKey) -> bool {
        matches!(self.tiles.lock().get(&key), Some(CacheEntry::Loaded(_)))
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        let (entry_count, pending_count) = {
            let tiles = self.tiles.lock();
            tiles
                .values()
                .fold((0u64, 0u64), |(loaded, pending), entry| match entry {
                    CacheEntry::Loaded(_) => (loaded + 1, pending),
                    CacheEntry::Pending(_) => (loaded, pending + 1),
                })
        };

        CacheStats {
            entry_count,
            pending_count,
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
        }
    }

    /// Get the tile directory path.
    pub fn tile_dir(&self) -> &Path {
        &self.tile_dir
    }

    /// Drop a resident tile so the next query reloads it.
    ///
    /// Queries already holding the tile finish against the old mapping. A
    /// load in flight for `key` is left alone.
    pub fn invalidate_tile(&self, key: TileKey) {
        let mut tiles = self.tiles.lock();
        if let Some(CacheEntry::Loaded(_)) = tiles.get(&key) {
            tiles.remove(&key);
        }
    }

    /// Drop every resident tile. Loads in flight are left alone.
    pub fn clear_cache(&self) {
        self.tiles
            .lock()
            .retain(|_, entry| matches!(entry, CacheEntry::Pending(_)));
    }

    /// Scan the tile directory for `.hgt` and `.hgt.zip` files.
    ///
    /// Returns a sorted, deduplicated list of keys; names that don't parse as
    /// a tile key are ignored.
    pub async fn scan_tile_files(&self) -> Result<Vec<TileKey>> {
        let dir = &self.tile_dir;
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| SrtmError::io(dir, e))?;

        let mut keys = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SrtmError::io(dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stem = strip_suffix_ignore_case(&name, ".zip").unwrap_or(&name);

            if strip_suffix_ignore_case(stem, ".hgt").is_none() {
                continue;
            }
            if let Ok(key) = stem.parse::<TileKey>() {
                keys.insert(key);
            }
        }

        Ok(keys.into_iter().collect())
    }

    /// Load the tiles found in the tile directory.
    ///
    /// With `bounds`, only tiles overlapping at least one box are loaded.
    /// Tiles go through the same load-once path as queries.
    ///
    /// ```ignore
    /// use hgt::{BoundingBox, TileSet};
    ///
    /// let tiles = TileSet::new("/data/srtm");
    /// let conus = BoundingBox::new(24.0, -125.0, 50.0, -66.0);
    /// let stats = tiles.preload(Some(&[conus])).await?;
    /// println!("Loaded {} tiles in {}ms", stats.tiles_loaded, stats.elapsed_ms);
    /// ```
    pub async fn preload(&self, bounds: Option<&[BoundingBox]>) -> Result<PreloadStats> {
        let start = Instant::now();
        let mut stats = PreloadStats::default();

        for key in self.scan_tile_files().await? {
            if let Some(boxes) = bounds {
                if !boxes.iter().any(|b| b.overlaps_tile(key)) {
                    continue;
                }
            }

            stats.tiles_matched += 1;

            if self.is_cached(key) {
                stats.tiles_already_cached += 1;
                continue;
            }

            match self.tile(key).await {
                Ok(_) => stats.tiles_loaded += 1,
                Err(_) => stats.tiles_failed += 1,
            }
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            tiles_loaded = stats.tiles_loaded,
            tiles_already_cached = stats.tiles_already_cached,
            tiles_failed = stats.tiles_failed,
            tiles_matched = stats.tiles_matched,
            elapsed_ms = stats.elapsed_ms,
            "Preload complete"
        );

        Ok(stats)
    }

    /// Release every resident tile, then clear the cache.
    pub fn destroy(self) {
        let tiles = self.tiles.into_inner();
        let released = tiles.len();

        for (_, entry) in tiles {
            // A tile still held by a caller of `tile()` is unmapped when that
            // handle drops.
            if let CacheEntry::Loaded(tile) = entry {
                if let Ok(tile) = Arc::try_unwrap(tile) {
                    tile.destroy();
                }
            }
        }

        tracing::debug!(dir = %self.tile_dir.display(), released, "Tile set destroyed");
    }
}

/// Completion handle for a `Pending` slot.
///
/// If dropped without [`finish`](PendingLoad::finish) (the driving query was
/// cancelled), the slot is removed and its waiters see a closed channel.
struct PendingLoad<'a> {
    tiles: &'a TileMap,
    key: TileKey,
    finished: bool,
}

impl PendingLoad<'_> {
    /// Publish `outcome` to the slot and every waiter.
    fn finish(mut self, outcome: LoadOutcome) -> LoadOutcome {
        self.finished = true;

        let previous = {
            let mut tiles = self.tiles.lock();
            match &outcome {
                Ok(tile) => tiles.insert(self.key, CacheEntry::Loaded(Arc::clone(tile))),
                Err(_) => tiles.remove(&self.key),
            }
        };

        if let Some(CacheEntry::Pending(waiters)) = previous {
            if !waiters.is_empty() {
                tracing::debug!(tile = %self.key, waiters = waiters.len(), "Resolving waiters");
            }
            for waiter in waiters {
                // A waiter that went away no longer needs the result
                let _ = waiter.send(outcome.clone());
            }
        }

        outcome
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let mut tiles = self.tiles.lock();
        if let Some(CacheEntry::Pending(_)) = tiles.get(&self.key) {
            tiles.remove(&self.key);
        }
    }
}

/// Builder for creating [`TileSet`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// use hgt::{Interpolation, TileSetBuilder};
///
/// let tiles = TileSetBuilder::new("/data/srtm")
///     .interpolation(Interpolation::NearestNeighbor)
///     .build();
/// ```
pub struct TileSetBuilder {
    tile_dir: PathBuf,
    interpolation: Interpolation,
    zip: bool,
    loader: Option<Box<dyn TileLoader>>,
}

impl TileSetBuilder {
    /// Create a new builder with the specified tile directory.
    pub fn new<P: AsRef<Path>>(tile_dir: P) -> Self {
        Self {
            tile_dir: tile_dir.as_ref().to_path_buf(),
            interpolation: Interpolation::default(),
            zip: false,
            loader: None,
        }
    }

    /// Create a builder configured from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `HGT_DATA_DIR` | Directory containing .hgt files | Required |
    /// | `HGT_INTERPOLATION` | `bilinear` or `nearest-neighbor` | `bilinear` |
    /// | `HGT_ZIP` | Also load `.hgt.zip` archives (`true`/`1`) | false |
    ///
    /// # Errors
    ///
    /// Returns [`SrtmError::Config`] if `HGT_DATA_DIR` is not set or
    /// `HGT_INTERPOLATION` names an unknown method.
    pub fn from_env() -> Result<Self> {
        let tile_dir = std::env::var("HGT_DATA_DIR").map_err(|_| SrtmError::Config {
            message: "HGT_DATA_DIR environment variable not set".to_string(),
        })?;

        let interpolation = match std::env::var("HGT_INTERPOLATION") {
            Ok(value) => value.parse()?,
            Err(_) => Interpolation::default(),
        };

        let zip = std::env::var("HGT_ZIP")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        Ok(Self {
            tile_dir: PathBuf::from(tile_dir),
            interpolation,
            zip,
            loader: None,
        })
    }

    /// Set the tile directory.
    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.tile_dir = path.as_ref().to_path_buf();
        self
    }

    /// Interpolation used by tiles opened with a built-in loader.
    ///
    /// Default is bilinear.
    pub fn interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Fall back to `.hgt.zip` archives when a plain `.hgt` is missing.
    pub fn zip_archives(mut self, enabled: bool) -> Self {
        self.zip = enabled;
        self
    }

    /// Replace the built-in loader.
    ///
    /// A custom loader decides its own interpolation; [`interpolation`]
    /// and [`zip_archives`] no longer apply.
    ///
    /// [`interpolation`]: TileSetBuilder::interpolation
    /// [`zip_archives`]: TileSetBuilder::zip_archives
    pub fn loader(mut self, loader: impl TileLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Build the [`TileSet`].
    pub fn build(self) -> TileSet {
        let loader = match self.loader {
            Some(loader) => loader,
            None if self.zip => Box::new(ZipTileLoader::new(self.interpolation)),
            None => Box::new(FsTileLoader::new(self.interpolation)),
        };

        TileSet {
            tile_dir: self.tile_dir,
            tiles: Mutex::new(HashMap::new()),
            loader,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
        }
    }
}

/// Parse a preload setting into bounding boxes.
///
/// Supported formats:
/// - `true`, `all`, `1`: preload all tiles (returns `Ok(None)`)
/// - `min_lat,min_lng,max_lat,max_lng`: single bounding box
/// - several boxes separated by `;`
///
/// # Errors
///
/// Returns [`SrtmError::Config`] if any box doesn't hold exactly four
/// numbers. A malformed setting never widens to "all tiles".
pub fn parse_preload_bounds(value: &str) -> Result<Option<Vec<BoundingBox>>> {
    let trimmed = value.trim();

    if matches!(trimmed.to_lowercase().as_str(), "true" | "all" | "1") {
        return Ok(None);
    }

    let boxes = trimmed
        .split(';')
        .map(|bbox_str| {
            let parts = bbox_str
                .split(',')
                .map(|s| s.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>();

            match parts.as_deref() {
                Ok(&[min_lat, min_lng, max_lat, max_lng]) => {
                    Ok(BoundingBox::new(min_lat, min_lng, max_lat, max_lng))
                }
                _ => Err(SrtmError::Config {
                    message: format!(
                        "invalid bounding box {:?}, expected min_lat,min_lng,max_lat,max_lng",
                        bbox_str.trim()
                    ),
                }),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(boxes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::test_support::srtm3_with_center;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    fn create_test_tile(dir: &Path, filename: &str, center_elevation: i16) {
        std::fs::write(dir.join(filename), srtm3_with_center(center_elevation)).unwrap();
    }

    /// Filesystem loader that counts calls and can hold each load until a
    /// permit is added to its gate.
    struct CountingLoader {
        inner: FsTileLoader,
        calls: Arc<AtomicUsize>,
        gate: Option<Arc<Semaphore>>,
    }

    impl CountingLoader {
        fn new(calls: &Arc<AtomicUsize>) -> Self {
            Self {
                inner: FsTileLoader::default(),
                calls: Arc::clone(calls),
                gate: None,
            }
        }

        fn gated(calls: &Arc<AtomicUsize>, gate: &Arc<Semaphore>) -> Self {
            Self {
                gate: Some(Arc::clone(gate)),
                ..Self::new(calls)
            }
        }
    }

    #[async_trait]
    impl TileLoader for CountingLoader {
        async fn load_tile(&self, tile_dir: &Path, key: TileKey) -> Result<Tile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.gate {
                Some(gate) => gate.acquire().await.unwrap().forget(),
                // Suspend once so concurrent queries can interleave
                None => tokio::task::yield_now().await,
            }
            self.inner.load_tile(tile_dir, key).await
        }
    }

    /// Poll until `cond` holds, failing the test after a few seconds.
    async fn wait_for(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_tileset_basic() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);

        let tiles = TileSet::new(temp_dir.path());

        assert_eq!(tiles.get_elevation((35.5, 138.5)).await.unwrap(), 500.0);
        assert!(tiles.is_cached(TileKey::new(35, 138)));
        assert_eq!(tiles.tile_dir(), temp_dir.path());
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);

        let tiles = TileSet::new(temp_dir.path());

        tiles.get_elevation((35.5, 138.5)).await.unwrap();
        let stats1 = tiles.cache_stats();
        assert_eq!(stats1.miss_count, 1);
        assert_eq!(stats1.hit_count, 0);
        assert_eq!(stats1.entry_count, 1);

        tiles.get_elevation((35.6, 138.6)).await.unwrap();
        let stats2 = tiles.cache_stats();
        assert_eq!(stats2.miss_count, 1);
        assert_eq!(stats2.hit_count, 1);
        assert_eq!(stats2.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_multiple_tiles() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        create_test_tile(temp_dir.path(), "N36E138.hgt", 1000);
        create_test_tile(temp_dir.path(), "S02E005.hgt", -40);

        let tiles = TileSet::new(temp_dir.path());

        assert_eq!(tiles.get_elevation((35.5, 138.5)).await.unwrap(), 500.0);
        assert_eq!(tiles.get_elevation((36.5, 138.5)).await.unwrap(), 1000.0);
        assert_eq!(tiles.get_elevation([-1.5, 5.5]).await.unwrap(), -40.0);
        assert_eq!(tiles.cache_stats().entry_count, 3);
    }

    #[tokio::test]
    async fn test_cell_edge_resolves_to_northern_tile() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N36E138.hgt", 1000);

        let tiles = TileSet::new(temp_dir.path());

        // lat 36.0 belongs to N36, where it is the south edge
        assert_eq!(tiles.get_elevation((36.0, 138.5)).await.unwrap(), 0.0);
        assert!(!tiles.is_cached(TileKey::new(35, 138)));
    }

    #[tokio::test]
    async fn test_nearest_neighbor_configuration() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);

        let tiles = TileSet::builder(temp_dir.path())
            .interpolation(Interpolation::NearestNeighbor)
            .build();

        // Bilinear would blend with the zero neighbours here
        let lat = 35.5 + 0.3 / 1200.0;
        assert_eq!(tiles.get_elevation((lat, 138.5)).await.unwrap(), 500.0);

        let tile = tiles.tile(TileKey::new(35, 138)).await.unwrap();
        assert_eq!(tile.interpolation(), Interpolation::NearestNeighbor);
    }

    #[tokio::test]
    async fn test_missing_tile_is_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let tiles = TileSet::builder(temp_dir.path())
            .loader(CountingLoader::new(&calls))
            .build();

        let err = tiles.get_elevation((50.5, 50.5)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!tiles.is_cached(TileKey::new(50, 50)));
        assert_eq!(tiles.cache_stats().entry_count, 0);
        assert_eq!(tiles.cache_stats().pending_count, 0);

        // The identical query loads again
        assert!(tiles.get_elevation((50.5, 50.5)).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Once the file appears the next query succeeds
        create_test_tile(temp_dir.path(), "N50E050.hgt", 250);
        assert_eq!(tiles.get_elevation((50.5, 50.5)).await.unwrap(), 250.0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_one_load() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        let calls = Arc::new(AtomicUsize::new(0));
        let tiles = TileSet::builder(temp_dir.path())
            .loader(CountingLoader::new(&calls))
            .build();

        let (a, b) = tokio::join!(
            tiles.get_elevation((35.5, 138.5)),
            tiles.get_elevation((35.0, 138.0)),
        );

        assert_eq!(a.unwrap(), 500.0);
        assert_eq!(b.unwrap(), 0.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = tiles.cache_stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.wait_count, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_failure_reaches_every_waiter() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let tiles = TileSet::builder(temp_dir.path())
            .loader(CountingLoader::new(&calls))
            .build();

        let (a, b, c) = tokio::join!(
            tiles.get_elevation((10.1, 20.1)),
            tiles.get_elevation((10.2, 20.2)),
            tiles.get_elevation((10.3, 20.3)),
        );

        for result in [a, b, c] {
            match result {
                Err(SrtmError::TileNotFound { path }) => {
                    assert_eq!(path, temp_dir.path().join("N10E020.hgt"));
                }
                other => panic!("Expected TileNotFound, got {other:?}"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tiles.cache_stats().pending_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_tasks_one_load() {
        const TASKS: usize = 16;

        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let tiles = Arc::new(
            TileSet::builder(temp_dir.path())
                .loader(CountingLoader::gated(&calls, &gate))
                .build(),
        );

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let tiles = Arc::clone(&tiles);
                tokio::spawn(async move { tiles.get_elevation((35.5, 138.5)).await })
            })
            .collect();

        // Hold the load until every other task has attached as a waiter
        wait_for(|| tiles.cache_stats().wait_count == (TASKS - 1) as u64).await;
        assert_eq!(tiles.cache_stats().pending_count, 1);
        gate.add_permits(1);

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 500.0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tiles.is_cached(TileKey::new(35, 138)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiter_takes_over_abandoned_load() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let tiles = Arc::new(
            TileSet::builder(temp_dir.path())
                .loader(CountingLoader::gated(&calls, &gate))
                .build(),
        );

        let driver = {
            let tiles = Arc::clone(&tiles);
            tokio::spawn(async move { tiles.get_elevation((35.5, 138.5)).await })
        };
        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;

        let waiter = {
            let tiles = Arc::clone(&tiles);
            tokio::spawn(async move { tiles.get_elevation((35.5, 138.5)).await })
        };
        wait_for(|| tiles.cache_stats().wait_count == 1).await;

        // Cancel the query driving the load; the waiter must start its own
        driver.abort();
        assert!(driver.await.unwrap_err().is_cancelled());
        wait_for(|| calls.load(Ordering::SeqCst) == 2).await;
        gate.add_permits(1);

        assert_eq!(waiter.await.unwrap().unwrap(), 500.0);
        assert_eq!(tiles.cache_stats().miss_count, 2);
    }

    #[tokio::test]
    async fn test_invalid_coordinate() {
        let temp_dir = TempDir::new().unwrap();
        let tiles = TileSet::new(temp_dir.path());

        let err = tiles.get_elevation((f64::NAN, 0.0)).await.unwrap_err();
        assert!(matches!(err, SrtmError::InvalidCoordinate { .. }));
        assert_eq!(tiles.cache_stats().miss_count, 0);
    }

    #[tokio::test]
    async fn test_get_elevations_batch() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        let calls = Arc::new(AtomicUsize::new(0));
        let tiles = TileSet::builder(temp_dir.path())
            .loader(CountingLoader::new(&calls))
            .build();

        let coords = [
            (35.5, 138.5),   // valid tile, center = 500
            (50.5, 50.5),    // missing tile
            (35.1, 138.1),   // same tile, zero data
            (f64::NAN, 0.0), // rejected
            (50.7, 50.7),    // missing tile again
        ];
        let results = tiles.get_elevations(&coords).await;

        assert_eq!(results.len(), 5);
        assert_eq!(*results[0].as_ref().unwrap(), 500.0);
        assert!(results[1].as_ref().unwrap_err().is_not_found());
        assert_eq!(*results[2].as_ref().unwrap(), 0.0);
        assert!(matches!(results[3], Err(SrtmError::InvalidCoordinate { .. })));
        assert!(results[4].as_ref().unwrap_err().is_not_found());

        // One load per distinct cell
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_elevations_loads_distinct_tiles_concurrently() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        create_test_tile(temp_dir.path(), "N36E138.hgt", 600);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let tiles = Arc::new(
            TileSet::builder(temp_dir.path())
                .loader(CountingLoader::gated(&calls, &gate))
                .build(),
        );

        let batch = {
            let tiles = Arc::clone(&tiles);
            tokio::spawn(async move {
                tiles
                    .get_elevations(&[(35.5, 138.5), (36.5, 138.5), (35.5, 138.5)])
                    .await
            })
        };

        // Both loads start before either is allowed to finish
        wait_for(|| calls.load(Ordering::SeqCst) == 2).await;
        assert_eq!(tiles.cache_stats().pending_count, 2);
        gate.add_permits(2);

        let results = batch.await.unwrap();
        assert_eq!(*results[0].as_ref().unwrap(), 500.0);
        assert_eq!(*results[1].as_ref().unwrap(), 600.0);
        assert_eq!(*results[2].as_ref().unwrap(), 500.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_and_invalidate() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        create_test_tile(temp_dir.path(), "N36E138.hgt", 600);

        let tiles = TileSet::new(temp_dir.path());
        tiles.get_elevation((35.5, 138.5)).await.unwrap();
        tiles.get_elevation((36.5, 138.5)).await.unwrap();

        tiles.invalidate_tile(TileKey::new(35, 138));
        assert!(!tiles.is_cached(TileKey::new(35, 138)));
        assert!(tiles.is_cached(TileKey::new(36, 138)));

        tiles.clear_cache();
        assert_eq!(tiles.cache_stats().entry_count, 0);

        // After clearing, next access should be a miss again
        tiles.get_elevation((36.5, 138.5)).await.unwrap();
        assert_eq!(tiles.cache_stats().miss_count, 3);
    }

    #[tokio::test]
    async fn test_held_tile_survives_clear() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);

        let tiles = TileSet::new(temp_dir.path());
        let tile = tiles.tile(TileKey::new(35, 138)).await.unwrap();
        tiles.clear_cache();

        assert_eq!(tile.get_elevation((35.5, 138.5)).unwrap(), 500.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clear_leaves_pending_load() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let tiles = Arc::new(
            TileSet::builder(temp_dir.path())
                .loader(CountingLoader::gated(&calls, &gate))
                .build(),
        );

        let query = {
            let tiles = Arc::clone(&tiles);
            tokio::spawn(async move { tiles.get_elevation((35.5, 138.5)).await })
        };
        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;

        tiles.clear_cache();
        tiles.invalidate_tile(TileKey::new(35, 138));
        assert_eq!(tiles.cache_stats().pending_count, 1);

        gate.add_permits(1);
        assert_eq!(query.await.unwrap().unwrap(), 500.0);
        assert!(tiles.is_cached(TileKey::new(35, 138)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zip_archives_option() {
        let temp_dir = TempDir::new().unwrap();
        let zip_path = temp_dir.path().join("N40E010.hgt.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut zip_writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip_writer.start_file("N40E010.hgt", options).unwrap();
        std::io::Write::write_all(&mut zip_writer, &srtm3_with_center(900)).unwrap();
        zip_writer.finish().unwrap();

        let plain = TileSet::new(temp_dir.path());
        assert!(plain.get_elevation((40.5, 10.5)).await.unwrap_err().is_not_found());

        let zipped = TileSet::builder(temp_dir.path()).zip_archives(true).build();
        assert_eq!(zipped.get_elevation((40.5, 10.5)).await.unwrap(), 900.0);
    }

    #[tokio::test]
    async fn test_destroy_releases_tiles() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);

        let tiles = TileSet::new(temp_dir.path());
        tiles.get_elevation((35.5, 138.5)).await.unwrap();
        let held = tiles.tile(TileKey::new(35, 138)).await.unwrap();

        tiles.destroy();

        // A handle taken before destruction stays valid until dropped
        assert_eq!(held.get_elevation((35.5, 138.5)).unwrap(), 500.0);
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[tokio::test]
    async fn test_scan_tile_files() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N36E139.hgt", 1000);
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        std::fs::write(temp_dir.path().join("N35E138.hgt.zip"), b"").unwrap();
        std::fs::write(temp_dir.path().join("S01W001.hgt.zip"), b"").unwrap();
        std::fs::write(temp_dir.path().join("N10E020.HGT"), b"").unwrap();
        std::fs::write(temp_dir.path().join("s05w010.Hgt.ZIP"), b"").unwrap();
        std::fs::write(temp_dir.path().join("readme.txt"), "not a tile").unwrap();
        std::fs::write(temp_dir.path().join("bogus.hgt"), b"").unwrap();

        let tiles = TileSet::new(temp_dir.path());
        let keys = tiles.scan_tile_files().await.unwrap();

        assert_eq!(
            keys,
            vec![
                TileKey::new(-5, -10),
                TileKey::new(-1, -1),
                TileKey::new(10, 20),
                TileKey::new(35, 138),
                TileKey::new(36, 139),
            ]
        );
    }

    #[tokio::test]
    async fn test_scan_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let tiles = TileSet::new(temp_dir.path().join("absent"));

        assert!(matches!(
            tiles.scan_tile_files().await,
            Err(SrtmError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_preload() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);
        create_test_tile(temp_dir.path(), "N50E010.hgt", 1000);
        create_test_tile(temp_dir.path(), "N20E020.hgt", 200);
        std::fs::write(temp_dir.path().join("N21E020.hgt"), [0u8; 10]).unwrap();

        let tiles = TileSet::new(temp_dir.path());

        let japan = BoundingBox::new(34.0, 137.0, 37.0, 140.0);
        let stats = tiles.preload(Some(&[japan])).await.unwrap();
        assert_eq!(stats.tiles_matched, 1);
        assert_eq!(stats.tiles_loaded, 1);
        assert!(tiles.is_cached(TileKey::new(35, 138)));

        let stats = tiles.preload(None).await.unwrap();
        assert_eq!(stats.tiles_matched, 4);
        assert_eq!(stats.tiles_already_cached, 1);
        assert_eq!(stats.tiles_loaded, 2);
        assert_eq!(stats.tiles_failed, 1);
        assert_eq!(tiles.cache_stats().entry_count, 3);
    }

    #[test]
    fn test_parse_preload_bounds() {
        assert!(parse_preload_bounds("all").unwrap().is_none());
        assert!(parse_preload_bounds(" TRUE ").unwrap().is_none());
        assert!(parse_preload_bounds("1").unwrap().is_none());

        let boxes = parse_preload_bounds("24,-125,50,-66; 49,9,52,12").unwrap().unwrap();
        assert_eq!(
            boxes,
            vec![
                BoundingBox::new(24.0, -125.0, 50.0, -66.0),
                BoundingBox::new(49.0, 9.0, 52.0, 12.0),
            ]
        );
    }

    #[test]
    fn test_parse_preload_bounds_rejects_malformed_boxes() {
        for value in [
            // A stray field must not shift the others into place
            "24,-125,abc,50,-66",
            // Too few numbers must not widen to every tile
            "35,138,36",
            "24,-125,50,-66;35,138,36",
            "24,-125,50,-66,1",
            "garbage",
            "",
        ] {
            match parse_preload_bounds(value) {
                Err(SrtmError::Config { message }) => {
                    assert!(message.contains("bounding box"), "{value:?}: {message}");
                }
                other => panic!("{value:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hit_count: 80,
            miss_count: 15,
            wait_count: 5,
            ..CacheStats::default()
        };
        assert_eq!(stats.hit_rate(), 0.8);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_builder_from_env() {
        // All environment cases live in one test so they don't race each other
        let saved: Vec<_> = ["HGT_DATA_DIR", "HGT_INTERPOLATION", "HGT_ZIP"]
            .iter()
            .map(|name| (*name, std::env::var(name).ok()))
            .collect();

        std::env::remove_var("HGT_DATA_DIR");
        std::env::remove_var("HGT_INTERPOLATION");
        std::env::remove_var("HGT_ZIP");
        assert!(matches!(
            TileSetBuilder::from_env(),
            Err(SrtmError::Config { .. })
        ));

        std::env::set_var("HGT_DATA_DIR", "/data/srtm");
        let builder = TileSetBuilder::from_env().unwrap();
        assert_eq!(builder.tile_dir, PathBuf::from("/data/srtm"));
        assert_eq!(builder.interpolation, Interpolation::Bilinear);
        assert!(!builder.zip);

        std::env::set_var("HGT_INTERPOLATION", "nearest-neighbor");
        std::env::set_var("HGT_ZIP", "1");
        let builder = TileSetBuilder::from_env().unwrap();
        assert_eq!(builder.interpolation, Interpolation::NearestNeighbor);
        assert!(builder.zip);

        std::env::set_var("HGT_INTERPOLATION", "bicubic");
        assert!(matches!(
            TileSetBuilder::from_env(),
            Err(SrtmError::Config { .. })
        ));

        for (name, value) in saved {
            match value {
                Some(v) => std::env::set_var(name, v),
                None => std::env::remove_var(name),
            }
        }
    }
}

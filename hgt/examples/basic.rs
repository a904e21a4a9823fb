//! Basic example demonstrating hgt library usage.
//!
//! Run with: cargo run --example basic -- /path/to/hgt/files
//!
//! Set `HGT_PRELOAD` (`all` or `min_lat,min_lng,max_lat,max_lng;...`) to load
//! tiles up front, and `RUST_LOG=hgt=debug` to watch the loads.

use std::env;

use anyhow::Context;
use hgt::{parse_preload_bounds, Interpolation, SrtmError, TileSet};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hgt=info")),
        )
        .init();

    let data_dir = env::args()
        .nth(1)
        .context("Usage: cargo run --example basic -- /path/to/hgt/files")?;

    let tiles = TileSet::new(&data_dir);

    if let Ok(value) = env::var("HGT_PRELOAD") {
        let bounds = parse_preload_bounds(&value)?;
        let stats = tiles.preload(bounds.as_deref()).await?;
        println!(
            "Preloaded {} of {} tiles in {}ms",
            stats.tiles_loaded, stats.tiles_matched, stats.elapsed_ms
        );
    }

    // Query some famous peaks
    let locations = [
        ("Mount Fuji, Japan", 35.3606, 138.7274),
        ("Mount Everest, Nepal", 27.9881, 86.9250),
        ("Denali, Alaska", 63.0695, -151.0074),
    ];

    println!("Elevation queries (bilinear):");
    println!("{:-<50}", "");

    for (name, lat, lng) in &locations {
        match tiles.get_elevation((*lat, *lng)).await {
            Ok(elevation) => {
                println!("{}: {:.1}m", name, elevation);
            }
            Err(SrtmError::TileNotFound { .. }) => {
                println!("{}: tile not available locally", name);
            }
            Err(e) => {
                println!("{}: error - {}", name, e);
            }
        }
    }

    // Compare against nearest-neighbor on the same data
    let nearest = TileSet::builder(&data_dir)
        .interpolation(Interpolation::NearestNeighbor)
        .build();
    let (lat, lng) = (35.3606, 138.7274);
    if let (Ok(a), Ok(b)) = (
        nearest.get_elevation((lat, lng)).await,
        tiles.get_elevation((lat, lng)).await,
    ) {
        println!("\nAt ({}, {}): nearest {}m, bilinear {:.2}m", lat, lng, a, b);
    }

    // Show cache statistics
    let stats = tiles.cache_stats();
    println!("\nCache statistics:");
    println!("  Cached tiles: {}", stats.entry_count);
    println!("  Hits: {}", stats.hit_count);
    println!("  Misses: {}", stats.miss_count);
    println!("  Hit rate: {:.1}%", stats.hit_rate() * 100.0);

    tiles.destroy();
    nearest.destroy();

    Ok(())
}

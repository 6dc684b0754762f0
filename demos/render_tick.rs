//! Three sprite buckets stacked back-to-front and updated as one tick.
//!
//! Usage: cargo run --example render_tick [config.yaml]
//! Set RUST_LOG=tierflow=debug to watch chunk dispatch.

use std::time::Duration;

use anyhow::{Context, Result};
use tierflow::{Bucket, Coordinator, EngineConfig, Sprite};
use tracing_subscriber::EnvFilter;

const SPRITES_PER_BUCKET: usize = 20;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_yaml_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => EngineConfig::default(),
    };

    println!("Loading assets.");
    let back = Bucket::new("back", Duration::ZERO).with_items(SPRITES_PER_BUCKET, Sprite::new);
    let mid = Bucket::new("mid", Duration::ZERO)
        .with_items(SPRITES_PER_BUCKET, |tag| Sprite::new(tag).with_velocity(1, 0));
    let front = Bucket::new("front", Duration::ZERO)
        .with_items(SPRITES_PER_BUCKET, |tag| Sprite::new(tag).with_velocity(2, 1));

    let mut coordinator = Coordinator::with_config(config)?;
    coordinator.register(back).register(mid).register(front);
    println!("Assets loaded.");

    let report = coordinator.update_all().await?;

    for bucket in &report.buckets {
        println!(
            "  slot {:?} {:<6} {} items in {} chunk(s)",
            bucket.slot,
            bucket.name,
            bucket.items,
            bucket.chunks()
        );
    }
    println!("Update completed. Took {:?}", report.elapsed);
    println!("{}", serde_json::to_string_pretty(&coordinator.metrics())?);

    Ok(())
}

//! `status` command handler.

use anyhow::{Context, Result};

use precache::config::Config;
use precache::request::RequestDescriptor;
use precache::storage::CacheStorage;

/// Show buckets on disk and what the configured bucket holds.
pub(crate) async fn cmd_status(config: Config) -> Result<()> {
    let storage = CacheStorage::new(config.cache_dir());

    println!("Precache Status");
    println!("===============");
    println!();
    println!("Cache dir:  {}", storage.dir().display());
    println!("Origin:     {}", config.origin);
    println!("Cache name: {}", config.cache_name);
    println!();

    let names = storage
        .keys()
        .await
        .context("Failed to list cache buckets")?;
    if names.is_empty() {
        println!("No cache buckets. Run `precache install` to seed one.");
        return Ok(());
    }
    println!("Buckets:");
    for name in &names {
        let marker = if *name == config.cache_name {
            " (active)"
        } else {
            " (stale)"
        };
        println!("  {}{}", name, marker);
    }
    println!();

    let installed = storage
        .has(&config.cache_name)
        .await
        .context("Failed to check the active bucket")?;
    if !installed {
        println!("Active bucket '{}' not installed yet.", config.cache_name);
        return Ok(());
    }

    let bucket = storage
        .open(&config.cache_name)
        .await
        .with_context(|| format!("Failed to open bucket '{}'", config.cache_name))?;
    let entries = bucket.entries().await;
    println!("Entries in '{}': {}", bucket.name(), entries.len());
    for (key, entry) in &entries {
        println!(
            "  {} {} {} bytes sha256:{}",
            entry.status,
            key,
            entry.body.len(),
            &entry.body_digest()[..12]
        );
    }

    let origin = config.origin_url()?;
    let mut missing = Vec::new();
    for asset in &config.assets {
        let request = RequestDescriptor::resolve(&origin, asset)?;
        if bucket.match_request(&request).await.is_none() {
            missing.push(asset);
        }
    }
    if !missing.is_empty() {
        println!();
        println!("Configured assets not in the bucket:");
        for asset in missing {
            println!("  {}", asset);
        }
    }
    Ok(())
}

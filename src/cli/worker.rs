//! `install`, `fetch` and `serve` command handlers.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use precache::config::Config;
use precache::request::{RequestDescriptor, ResponseSnapshot};
use precache::server::{start_server, ProxyState};
use precache::worker::spawn_worker;

use super::build_worker;

/// Event channel depth for the CLI-hosted worker.
const EVENT_CAPACITY: usize = 64;

/// Seed the cache bucket.
pub(crate) async fn cmd_install(mut config: Config, assets: Vec<String>) -> Result<()> {
    if !assets.is_empty() {
        config.assets = assets;
    }
    let worker = build_worker(&config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, task) = spawn_worker(worker, EVENT_CAPACITY, shutdown_rx);

    let result = handle.install().await;
    let _ = shutdown_tx.send(true);
    let _ = task.await;

    let stored = result.with_context(|| format!("Install of '{}' failed", config.cache_name))?;
    println!(
        "Installed {} asset(s) into cache '{}'.",
        stored, config.cache_name
    );
    Ok(())
}

/// Fetch one path through the worker.
pub(crate) async fn cmd_fetch(
    config: Config,
    path: &str,
    output: Option<PathBuf>,
    include: bool,
) -> Result<()> {
    let worker = build_worker(&config)?;
    let request = RequestDescriptor::resolve(&worker.settings().origin, path)
        .with_context(|| format!("'{}' does not resolve against the origin", path))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, task) = spawn_worker(worker, EVENT_CAPACITY, shutdown_rx);

    let result = handle.fetch(request.clone()).await;
    let _ = shutdown_tx.send(true);
    let _ = task.await;

    let response = result.with_context(|| format!("Fetch of {} failed", request.url))?;
    match response.stored_at {
        Some(at) => eprintln!("served from cache '{}' (stored {})", config.cache_name, at),
        None => eprintln!("served from network"),
    }

    let mut out: Vec<u8> = Vec::new();
    if include {
        out.extend_from_slice(&status_block(&response));
    }
    out.extend_from_slice(&response.body);

    match output {
        Some(file) => {
            tokio::fs::write(&file, &out)
                .await
                .with_context(|| format!("Failed to write {}", file.display()))?;
            eprintln!("wrote {} bytes to {}", out.len(), file.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&out)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn status_block(response: &ResponseSnapshot) -> Vec<u8> {
    let mut block = format!("HTTP {} {}\n", response.status, response.status_text).into_bytes();
    for (name, value) in &response.headers {
        block.extend_from_slice(name.as_bytes());
        block.extend_from_slice(b": ");
        block.extend_from_slice(value);
        block.push(b'\n');
    }
    block.push(b'\n');
    block
}

/// Install (unless skipped), then run the proxy until Ctrl-C.
pub(crate) async fn cmd_serve(
    mut config: Config,
    bind: Option<String>,
    port: Option<u16>,
    skip_install: bool,
) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let worker = build_worker(&config)?;
    let origin = worker.settings().origin.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, task) = spawn_worker(worker, EVENT_CAPACITY, shutdown_rx);

    if skip_install {
        warn!(cache = %config.cache_name, "Skipping install; serving existing bucket contents");
    } else {
        let stored = handle
            .install()
            .await
            .with_context(|| format!("Install of '{}' failed", config.cache_name))?;
        info!(cache = %config.cache_name, stored, "Install complete, starting proxy");
    }

    let state = ProxyState {
        worker: handle,
        origin,
        cache_name: config.cache_name.clone(),
    };
    let served = tokio::select! {
        result = start_server(&config.server, state) => {
            result.map_err(|e| anyhow::anyhow!("{}", e))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            Ok(())
        }
    };
    let _ = shutdown_tx.send(true);
    let _ = task.await;
    served.context("Proxy server failed")
}

//! Lifecycle event loop for the offline worker.
//!
//! Hosts send [`WorkerEvent`]s over an mpsc channel; each event carries a
//! oneshot reply, so the sender awaits the handler's outcome the way a
//! page waits on install or on a fetch response. Every event runs on its own
//! task: fetches complete in whatever order their I/O finishes.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::OfflineWorker;
use crate::error::{PrecacheError, Result};
use crate::request::{RequestDescriptor, ResponseSnapshot};

/// A lifecycle signal delivered to the worker.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Seed the cache. Replies with the number of assets stored.
    Install {
        reply: oneshot::Sender<Result<usize>>,
    },
    /// Intercept an outgoing request.
    Fetch {
        request: RequestDescriptor,
        reply: oneshot::Sender<Result<ResponseSnapshot>>,
    },
}

/// Sending side of the worker's event channel.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerEvent>,
}

impl WorkerHandle {
    /// Dispatch an install event and wait for it to finish.
    pub async fn install(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerEvent::Install { reply }).await?;
        rx.await
            .map_err(|_| PrecacheError::Worker("install handler dropped its reply".into()))?
    }

    /// Dispatch a fetch event and wait for the response.
    pub async fn fetch(&self, request: RequestDescriptor) -> Result<ResponseSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerEvent::Fetch { request, reply }).await?;
        rx.await
            .map_err(|_| PrecacheError::Worker("fetch handler dropped its reply".into()))?
    }

    async fn send(&self, event: WorkerEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PrecacheError::Worker("worker event loop is not running".into()))
    }
}

/// Start the event loop on the current runtime.
///
/// The loop ends when `shutdown_rx` reads `true`, its sender is dropped, or
/// every handle is dropped.
pub fn spawn_worker(
    worker: Arc<OfflineWorker>,
    capacity: usize,
    shutdown_rx: watch::Receiver<bool>,
) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_worker(worker, rx, shutdown_rx));
    (WorkerHandle { tx }, task)
}

/// Receive events until shutdown, handling each on its own task.
pub async fn run_worker(
    worker: Arc<OfflineWorker>,
    mut rx: mpsc::Receiver<WorkerEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // `changed()` only sees updates after the receiver was created.
    if *shutdown_rx.borrow_and_update() {
        info!("Worker event loop shutting down");
        return;
    }
    loop {
        let event = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Worker event loop shutting down");
                    return;
                }
                continue;
            }
            event = rx.recv() => event,
        };

        let Some(event) = event else {
            debug!("All worker handles dropped, stopping event loop");
            return;
        };

        let worker = worker.clone();
        tokio::spawn(async move {
            match event {
                WorkerEvent::Install { reply } => {
                    let _ = reply.send(worker.install().await);
                }
                WorkerEvent::Fetch { request, reply } => {
                    let _ = reply.send(worker.handle_fetch(&request).await);
                }
            }
        });
    }
}

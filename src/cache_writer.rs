//! Detached cache writes
//!
//! Strategies hand freshly fetched responses to a [`CacheWriter`] and return
//! to the caller immediately. A background task applies the writes in order.
//! A failed write is logged and counted; nobody waits for it and it is not
//! retried.

use crate::cache::CacheStore;
use crate::metrics::EdgeMetrics;
use crate::models::{EdgeRequest, EdgeResponse};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Message for the background writer task
enum WriteMessage {
    Put {
        tier: String,
        request: EdgeRequest,
        response: EdgeResponse,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Best-effort, non-blocking cache writer
#[derive(Clone)]
pub struct CacheWriter {
    tx: mpsc::UnboundedSender<WriteMessage>,
}

impl CacheWriter {
    /// Start the writer task on the current tokio runtime
    pub fn spawn(store: Arc<dyn CacheStore>, metrics: Arc<EdgeMetrics>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            Self::writer_task(rx, store, metrics).await;
        });
        CacheWriter { tx }
    }

    /// Queue a write. Never blocks and never fails the caller.
    pub fn persist(&self, tier: &str, request: EdgeRequest, response: EdgeResponse) {
        let message = WriteMessage::Put {
            tier: tier.to_string(),
            request,
            response,
        };
        if self.tx.send(message).is_err() {
            warn!("Cache writer stopped, dropping write for tier {}", tier);
        }
    }

    /// Wait until every write queued before this call has been applied
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Stop the writer task after the already queued writes
    pub fn shutdown(&self) {
        let _ = self.tx.send(WriteMessage::Shutdown);
    }

    async fn writer_task(
        mut rx: mpsc::UnboundedReceiver<WriteMessage>,
        store: Arc<dyn CacheStore>,
        metrics: Arc<EdgeMetrics>,
    ) {
        info!("Cache writer task started");

        while let Some(msg) = rx.recv().await {
            match msg {
                WriteMessage::Put {
                    tier,
                    request,
                    response,
                } => {
                    let result = match store.open(&tier).await {
                        Ok(handle) => handle.put(&request, &response).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(()) => {
                            debug!("Persisted {} into {}", request.url(), tier);
                            metrics.record_cache_write(true);
                        }
                        Err(e) => {
                            warn!("Failed to persist {} into {}: {}", request.url(), tier, e);
                            metrics.record_cache_write(false);
                        }
                    }
                }
                WriteMessage::Flush(done) => {
                    let _ = done.send(());
                }
                WriteMessage::Shutdown => {
                    info!("Cache writer task shutting down");
                    break;
                }
            }
        }
    }
}

//! Deferred retry queue
//!
//! The application queues mutating requests that failed while the network was
//! down. When connectivity comes back, [`RetryQueue::replay`] re-sends each one
//! once. Requests that still do not succeed stay queued for the next replay.

use crate::error::{Result, ShieldError};
use crate::fetcher::NetworkFetcher;
use crate::models::EdgeRequest;
use crate::token::now_millis;
use http::Method;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A request waiting to be replayed
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub id: u64,
    pub request: EdgeRequest,
    pub queued_at_ms: u64,
    /// Replays attempted so far
    pub attempts: u32,
}

/// Outcome of one replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Ids of requests that got a 2xx response and were removed
    pub delivered: Vec<u64>,
    /// Ids of requests kept for the next replay
    pub retained: Vec<u64>,
}

impl ReplayReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.retained.len()
    }
}

/// Queue of failed mutating requests
pub struct RetryQueue {
    fetcher: Arc<dyn NetworkFetcher>,
    pending: Mutex<VecDeque<QueuedRequest>>,
    next_id: AtomicU64,
}

impl RetryQueue {
    pub fn new(fetcher: Arc<dyn NetworkFetcher>) -> Self {
        RetryQueue {
            fetcher,
            pending: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a request for a later replay. GET requests and image requests
    /// are rejected.
    pub fn enqueue(&self, request: EdgeRequest) -> Result<u64> {
        if request.method() == Method::GET {
            return Err(ShieldError::RejectedRequest(format!(
                "GET {} is not replayable",
                request.url()
            )));
        }
        if request.destination().is_image() {
            return Err(ShieldError::RejectedRequest(format!(
                "image request {} is not replayable",
                request.url()
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("Queued {} {} for replay as #{}", request.method(), request.url(), id);
        self.lock().push_back(QueuedRequest {
            id,
            request,
            queued_at_ms: now_millis(),
            attempts: 0,
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the queued requests, oldest first
    pub fn pending(&self) -> Vec<QueuedRequest> {
        self.lock().iter().cloned().collect()
    }

    /// Re-send every queued request once, in queue order.
    ///
    /// Requests queued while the replay runs are left for the next one.
    pub async fn replay(&self) -> ReplayReport {
        let batch: Vec<QueuedRequest> = self.lock().drain(..).collect();
        let mut report = ReplayReport::default();
        let mut retained = Vec::new();

        for mut queued in batch {
            queued.attempts += 1;
            match self.fetcher.fetch(&queued.request).await {
                Ok(response) if response.is_success() => {
                    debug!("Replayed #{} -> {}", queued.id, response.status);
                    report.delivered.push(queued.id);
                }
                Ok(response) => {
                    warn!(
                        "Replay of #{} {} returned {}, keeping it",
                        queued.id,
                        queued.request.url(),
                        response.status
                    );
                    report.retained.push(queued.id);
                    retained.push(queued);
                }
                Err(e) => {
                    warn!("Replay of #{} {} failed: {}", queued.id, queued.request.url(), e);
                    report.retained.push(queued.id);
                    retained.push(queued);
                }
            }
        }

        let mut pending = self.lock();
        for queued in retained.into_iter().rev() {
            pending.push_front(queued);
        }
        drop(pending);

        info!(
            "Replay finished: {} delivered, {} retained",
            report.delivered.len(),
            report.retained.len()
        );
        report
    }
}

//! Metrics collection for the edge shield
//!
//! Thread-safe counters using atomic operations. Tracks requests per class,
//! cache hits and misses, origin fetches, synthesized refusals and the
//! detached cache writes.

use crate::models::RequestClass;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the edge shield
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct EdgeMetrics {
    // Request statistics
    total_requests: AtomicU64,
    static_requests: AtomicU64,
    image_requests: AtomicU64,
    dynamic_requests: AtomicU64,
    generic_requests: AtomicU64,

    // Cache statistics
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,

    // Origin statistics
    network_fetches: AtomicU64,
    network_failures: AtomicU64,
    fallback_responses: AtomicU64,

    // Protected image refusals
    navigation_blocks: AtomicU64,
    policy_denials: AtomicU64,

    // Detached writes
    cache_writes: AtomicU64,
    cache_write_failures: AtomicU64,

    total_request_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub static_requests: u64,
    pub image_requests: u64,
    pub dynamic_requests: u64,
    pub generic_requests: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,

    pub network_fetches: u64,
    pub network_failures: u64,
    pub fallback_responses: u64,

    pub navigation_blocks: u64,
    pub policy_denials: u64,

    pub cache_writes: u64,
    pub cache_write_failures: u64,

    pub total_request_duration_us: u64,
}

impl EdgeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request of the given class
    pub fn record_request(&self, class: RequestClass) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match class {
            RequestClass::StaticAsset => &self.static_requests,
            RequestClass::ProtectedImage => &self.image_requests,
            RequestClass::Dynamic => &self.dynamic_requests,
            RequestClass::Generic => &self.generic_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed cache lookup (treated as a miss by the caller)
    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a network fetch
    ///
    /// # Arguments
    /// * `success` - Whether the fetch produced a response (any status)
    pub fn record_network_fetch(&self, success: bool) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.network_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a response synthesized after a network failure
    pub fn record_fallback_response(&self) {
        self.fallback_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_navigation_block(&self) {
        self.navigation_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_policy_denial(&self) {
        self.policy_denials.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a detached cache write
    pub fn record_cache_write(&self, success: bool) {
        if success {
            self.cache_writes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_write_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// The snapshot may not be perfectly consistent across fields while
    /// requests are in flight.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            static_requests: self.static_requests.load(Ordering::Relaxed),
            image_requests: self.image_requests.load(Ordering::Relaxed),
            dynamic_requests: self.dynamic_requests.load(Ordering::Relaxed),
            generic_requests: self.generic_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            network_failures: self.network_failures.load(Ordering::Relaxed),
            fallback_responses: self.fallback_responses.load(Ordering::Relaxed),
            navigation_blocks: self.navigation_blocks.load(Ordering::Relaxed),
            policy_denials: self.policy_denials.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Calculate cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate network failure rate as a percentage (0.0 to 100.0)
    pub fn network_failure_rate(&self) -> f64 {
        if self.network_fetches == 0 {
            0.0
        } else {
            (self.network_failures as f64 / self.network_fetches as f64) * 100.0
        }
    }

    /// Calculate average request duration in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / self.total_requests as f64) / 1000.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_request_by_class() {
        let metrics = EdgeMetrics::new();

        metrics.record_request(RequestClass::StaticAsset);
        metrics.record_request(RequestClass::ProtectedImage);
        metrics.record_request(RequestClass::ProtectedImage);
        metrics.record_request(RequestClass::Generic);

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.static_requests, 1);
        assert_eq!(stats.image_requests, 2);
        assert_eq!(stats.dynamic_requests, 0);
        assert_eq!(stats.generic_requests, 1);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = EdgeMetrics::new();

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        let stats = metrics.get_stats();
        assert_eq!(stats.cache_hit_rate(), 75.0);
    }

    #[test]
    fn test_cache_hit_rate_no_operations() {
        let stats = EdgeMetrics::new().get_stats();
        assert_eq!(stats.cache_hit_rate(), 0.0);
        assert_eq!(stats.network_failure_rate(), 0.0);
    }

    #[test]
    fn test_network_failure_rate() {
        let metrics = EdgeMetrics::new();

        metrics.record_network_fetch(true);
        metrics.record_network_fetch(false);

        let stats = metrics.get_stats();
        assert_eq!(stats.network_fetches, 2);
        assert_eq!(stats.network_failures, 1);
        assert_eq!(stats.network_failure_rate(), 50.0);
    }

    #[test]
    fn test_cache_writes() {
        let metrics = EdgeMetrics::new();

        metrics.record_cache_write(true);
        metrics.record_cache_write(true);
        metrics.record_cache_write(false);

        let stats = metrics.get_stats();
        assert_eq!(stats.cache_writes, 2);
        assert_eq!(stats.cache_write_failures, 1);
    }

    #[test]
    fn test_avg_request_duration() {
        let metrics = EdgeMetrics::new();

        metrics.record_request(RequestClass::Generic);
        metrics.record_request_duration(Duration::from_millis(100));
        metrics.record_request(RequestClass::Generic);
        metrics.record_request_duration(Duration::from_millis(200));

        assert_eq!(metrics.get_stats().avg_request_duration_ms(), 150.0);
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(EdgeMetrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let metrics_clone = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    metrics_clone.record_request(RequestClass::Dynamic);
                    metrics_clone.record_cache_miss();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 1000);
        assert_eq!(stats.dynamic_requests, 1000);
        assert_eq!(stats.cache_misses, 1000);
    }
}

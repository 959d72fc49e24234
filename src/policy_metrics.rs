//! Prometheus metrics for protected-image access decisions

use prometheus::{register_counter_vec, CounterVec, Registry};
use std::sync::Arc;

/// Metrics for the access policy
#[derive(Clone)]
pub struct PolicyMetrics {
    /// Decisions taken by the policy engine, by decision and reason
    pub decisions_total: Arc<CounterVec>,

    /// Requests refused by the direct-navigation pre-check before the engine ran
    pub navigation_blocks_total: Arc<CounterVec>,
}

impl PolicyMetrics {
    /// Create metrics registered in the default registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let decisions_total = register_counter_vec!(
            "edge_shield_policy_decisions_total",
            "Protected image access decisions",
            &["decision", "reason"] // decision: allow, deny
        )?;

        let navigation_blocks_total = register_counter_vec!(
            "edge_shield_navigation_blocks_total",
            "Protected image requests refused as direct navigation",
            &["mode"]
        )?;

        Ok(Self {
            decisions_total: Arc::new(decisions_total),
            navigation_blocks_total: Arc::new(navigation_blocks_total),
        })
    }

    /// Create metrics with custom registry
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let decisions_total = CounterVec::new(
            prometheus::Opts::new(
                "edge_shield_policy_decisions_total",
                "Protected image access decisions",
            ),
            &["decision", "reason"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let navigation_blocks_total = CounterVec::new(
            prometheus::Opts::new(
                "edge_shield_navigation_blocks_total",
                "Protected image requests refused as direct navigation",
            ),
            &["mode"],
        )?;
        registry.register(Box::new(navigation_blocks_total.clone()))?;

        Ok(Self {
            decisions_total: Arc::new(decisions_total),
            navigation_blocks_total: Arc::new(navigation_blocks_total),
        })
    }

    /// Record a policy engine decision
    pub fn record_decision(&self, decision: &str, reason: &str) {
        self.decisions_total
            .with_label_values(&[decision, reason])
            .inc();
    }

    /// Record a direct-navigation block
    pub fn record_navigation_block(&self, mode: &str) {
        self.navigation_blocks_total
            .with_label_values(&[mode])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_with_registry() {
        let registry = Registry::new();
        let metrics = PolicyMetrics::with_registry(&registry).unwrap();

        metrics.record_decision("deny", "bot_user_agent");
        metrics.record_decision("deny", "bot_user_agent");
        metrics.record_decision("allow", "image_tag_referer");
        metrics.record_navigation_block("navigate");

        assert_eq!(
            metrics
                .decisions_total
                .with_label_values(&["deny", "bot_user_agent"])
                .get(),
            2.0
        );
        assert_eq!(
            metrics
                .navigation_blocks_total
                .with_label_values(&["navigate"])
                .get(),
            1.0
        );

        let families = registry.gather();
        assert_eq!(families.len(), 2);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        let _first = PolicyMetrics::with_registry(&registry).unwrap();
        assert!(PolicyMetrics::with_registry(&registry).is_err());
    }
}

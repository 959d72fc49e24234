//! Access policy for protected images
//!
//! The engine combines origin allow-listing, referer inspection, session token
//! freshness and user-agent heuristics. Every input is a request header that a
//! determined client can forge. The policy stops hotlinking, casual scraping
//! and people opening image URLs directly; it does not authenticate anyone.

use crate::config::PolicyConfig;
use crate::models::{EdgeRequest, RequestMode, ResourceKind};
use crate::policy_metrics::PolicyMetrics;
use crate::token::TokenValidator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const LOG_URL_CHARS: usize = 100;
const LOG_REFERER_CHARS: usize = 50;

/// Allow or deny
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }
}

/// Why a decision was taken. Observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    DevelopmentHost,
    BotUserAgent,
    ImageTagReferer,
    ExplicitAuth,
    DirectNavigation,
    NoValidCredentials,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::DevelopmentHost => "development_host",
            DecisionReason::BotUserAgent => "bot_user_agent",
            DecisionReason::ImageTagReferer => "image_tag_referer",
            DecisionReason::ExplicitAuth => "explicit_auth",
            DecisionReason::DirectNavigation => "direct_navigation",
            DecisionReason::NoValidCredentials => "no_valid_credentials",
        }
    }
}

/// Result of the access policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub reason: DecisionReason,
}

impl PolicyDecision {
    fn allow(reason: DecisionReason) -> Self {
        PolicyDecision {
            decision: Decision::Allow,
            reason,
        }
    }

    fn deny(reason: DecisionReason) -> Self {
        PolicyDecision {
            decision: Decision::Deny,
            reason,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// Whether a protected-image request looks like someone opening the URL directly.
///
/// True for top-level navigations, and for requests that carry no protected
/// flag header and declare no known destination. An `<img>` tag always
/// declares `image`; application fetches set the flag.
pub fn is_direct_navigation(request: &EdgeRequest, config: &PolicyConfig) -> bool {
    if request.mode() == RequestMode::Navigate {
        return true;
    }
    request.header(&config.protected_header).is_none()
        && matches!(request.destination(), ResourceKind::Empty | ResourceKind::Other(_))
}

/// Truncate to at most `max` characters
fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Decides whether a protected image may be fetched
pub struct AccessPolicy {
    config: Arc<PolicyConfig>,
    validator: TokenValidator,
    metrics: Option<Arc<PolicyMetrics>>,
    evaluations: AtomicU64,
}

impl AccessPolicy {
    pub fn new(config: Arc<PolicyConfig>, validator: TokenValidator) -> Self {
        AccessPolicy {
            config,
            validator,
            metrics: None,
            evaluations: AtomicU64::new(0),
        }
    }

    /// Enable Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<PolicyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Number of times [`AccessPolicy::decide`] has run
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Run the decision procedure
    ///
    /// In order: development host allow, bot user-agent deny, image-tag
    /// referer allow, explicit-auth allow, direct navigation deny, deny.
    pub fn decide(&self, request: &EdgeRequest, now_ms: u64) -> PolicyDecision {
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        let decision = self.evaluate(request, now_ms);
        self.record(request, &decision);
        decision
    }

    fn evaluate(&self, request: &EdgeRequest, now_ms: u64) -> PolicyDecision {
        if self.is_development_host() {
            return PolicyDecision::allow(DecisionReason::DevelopmentHost);
        }

        if self.is_bot(request) {
            return PolicyDecision::deny(DecisionReason::BotUserAgent);
        }

        let has_valid_referer = self.has_valid_referer(request);

        if request.destination().is_image() && has_valid_referer {
            return PolicyDecision::allow(DecisionReason::ImageTagReferer);
        }

        if has_valid_referer && self.has_explicit_auth(request, now_ms) {
            return PolicyDecision::allow(DecisionReason::ExplicitAuth);
        }

        if is_direct_navigation(request, &self.config) {
            return PolicyDecision::deny(DecisionReason::DirectNavigation);
        }

        PolicyDecision::deny(DecisionReason::NoValidCredentials)
    }

    /// Host of the configured serving origin. Never read from the request.
    fn serving_host(&self) -> Option<String> {
        let origin = self.config.serving_origin.as_ref()?;
        let uri = origin.parse::<http::Uri>().ok()?;
        uri.host().map(|h| h.to_ascii_lowercase())
    }

    fn is_development_host(&self) -> bool {
        match self.serving_host() {
            Some(host) => self
                .config
                .dev_hosts
                .iter()
                .any(|dev| dev.eq_ignore_ascii_case(&host)),
            None => false,
        }
    }

    fn is_bot(&self, request: &EdgeRequest) -> bool {
        let Some(user_agent) = request.header("user-agent") else {
            return false;
        };
        let user_agent = user_agent.to_ascii_lowercase();
        self.config
            .bot_signatures
            .iter()
            .any(|sig| user_agent.contains(&sig.to_ascii_lowercase()))
    }

    fn has_valid_referer(&self, request: &EdgeRequest) -> bool {
        let Some(referer) = request.header("referer").filter(|r| !r.is_empty()) else {
            return false;
        };

        if let Some(origin) = &self.config.serving_origin {
            if referer.starts_with(origin.as_str()) {
                return true;
            }
        }

        if self
            .config
            .dev_referer_markers
            .iter()
            .any(|marker| referer.contains(marker.as_str()))
        {
            return true;
        }

        self.config
            .allowed_origins
            .iter()
            .any(|allowed| allowed == referer)
    }

    fn has_explicit_auth(&self, request: &EdgeRequest, now_ms: u64) -> bool {
        let config = &self.config;
        request.header(&config.auth_header) == Some(config.auth_sentinel.as_str())
            && request.header(&config.protected_header) == Some(config.protected_sentinel.as_str())
            && self
                .validator
                .validate(request.header(&config.token_header), now_ms)
    }

    fn record(&self, request: &EdgeRequest, decision: &PolicyDecision) {
        let url = truncate(request.url(), LOG_URL_CHARS);
        let referer = truncate(request.header("referer").unwrap_or("none"), LOG_REFERER_CHARS);

        match decision.decision {
            Decision::Allow => info!(
                target: "edge_shield::policy",
                decision = decision.decision.as_str(),
                reason = decision.reason.as_str(),
                url,
                referer,
                "Protected image allowed"
            ),
            Decision::Deny => warn!(
                target: "edge_shield::policy",
                decision = decision.decision.as_str(),
                reason = decision.reason.as_str(),
                url,
                referer,
                "Protected image denied"
            ),
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_decision(decision.decision.as_str(), decision.reason.as_str());
        }
    }
}

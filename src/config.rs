//! Configuration management for the edge shield
//!
//! The configuration is loaded once, validated, and then shared as an
//! immutable `Arc<ShieldConfig>` by the classifier, the policy engine and the
//! strategy selector. Nothing mutates the live value; a reload builds a new
//! value and a new pipeline.

use crate::error::{Result, ShieldError};
use http::Uri;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShieldConfig {
    /// Address the front end listens on (default: "0.0.0.0:8080")
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Origin that network fetches are forwarded to, e.g. "http://127.0.0.1:3000".
    /// When unset, requests are fetched from their own URL.
    #[serde(default)]
    pub upstream_origin: Option<String>,

    /// Path accepting lifecycle control messages (default: "/__edge/control")
    #[serde(default = "default_control_path")]
    pub control_path: String,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub token: TokenConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Inputs to request classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    /// Paths served cache-first; matched against the end of the request URL
    #[serde(default = "default_static_manifest")]
    pub static_manifest: Vec<String>,

    /// Path prefix of protected images (default: "/images/")
    #[serde(default = "default_protected_image_prefix")]
    pub protected_image_prefix: String,

    /// Path prefix of the dynamic API (default: "/api/")
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

/// Inputs to the protected-image access policy.
///
/// These are heuristics over spoofable request headers. They deter casual
/// scraping and hotlinking; they are not an access-control boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    /// Origin this layer serves. When unset, referers are checked only against
    /// `allowed_origins` and the development markers, and the development host
    /// bypass is off.
    #[serde(default)]
    pub serving_origin: Option<String>,

    /// Referers that are accepted verbatim
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Hosts on which every protected image is allowed (local development)
    #[serde(default = "default_dev_hosts")]
    pub dev_hosts: Vec<String>,

    /// Substrings marking a referer as local development
    #[serde(default = "default_dev_referer_markers")]
    pub dev_referer_markers: Vec<String>,

    /// Header carrying the explicit-auth marker
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Required value of the explicit-auth marker
    #[serde(default = "default_auth_sentinel")]
    pub auth_sentinel: String,

    /// Header carrying the session token
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Header flagging an application-initiated protected fetch
    #[serde(default = "default_protected_header")]
    pub protected_header: String,

    /// Required value of the protected flag
    #[serde(default = "default_protected_sentinel")]
    pub protected_sentinel: String,

    /// Case-insensitive user-agent substrings of automated clients
    #[serde(default = "default_bot_signatures")]
    pub bot_signatures: Vec<String>,
}

/// Session token freshness window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenConfig {
    /// Maximum token age in milliseconds (default: 5 minutes)
    #[serde(default = "default_token_max_age_ms")]
    pub max_age_ms: u64,

    /// Tolerated clock skew for tokens from the future (default: 1 second)
    #[serde(default = "default_clock_skew_ms")]
    pub clock_skew_ms: u64,
}

/// Cache tier naming and storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Prefix of every tier name (default: "edge-shield")
    #[serde(default = "default_tier_prefix")]
    pub tier_prefix: String,

    /// Generation label appended to tier names (default: "v1")
    #[serde(default = "default_generation")]
    pub generation: String,

    /// Path of the image served when an image fetch fails
    #[serde(default = "default_placeholder_image")]
    pub placeholder_image: Option<String>,

    /// Storage backend: "memory" or "disk" (default: "memory")
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Directory of the disk backend
    #[serde(default = "default_disk_dir")]
    pub disk_dir: String,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_control_path() -> String {
    "/__edge/control".to_string()
}

fn default_static_manifest() -> Vec<String> {
    ["/", "/index.html", "/css/style.css", "/js/main.js", "/manifest.json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_protected_image_prefix() -> String {
    "/images/".to_string()
}

fn default_api_prefix() -> String {
    "/api/".to_string()
}

fn default_dev_hosts() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

fn default_dev_referer_markers() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

fn default_auth_header() -> String {
    "x-image-auth".to_string()
}

fn default_auth_sentinel() -> String {
    "authenticated".to_string()
}

fn default_token_header() -> String {
    "x-session-token".to_string()
}

fn default_protected_header() -> String {
    "x-protected-image".to_string()
}

fn default_protected_sentinel() -> String {
    "true".to_string()
}

fn default_bot_signatures() -> Vec<String> {
    [
        "curl",
        "wget",
        "python-requests",
        "python-urllib",
        "httpie",
        "go-http-client",
        "libwww",
        "scrapy",
        "postman",
        "insomnia",
        "bot",
        "crawler",
        "spider",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_token_max_age_ms() -> u64 {
    5 * 60 * 1000
}

fn default_clock_skew_ms() -> u64 {
    1000
}

fn default_tier_prefix() -> String {
    "edge-shield".to_string()
}

fn default_generation() -> String {
    "v1".to_string()
}

fn default_placeholder_image() -> Option<String> {
    Some("/images/placeholder.jpg".to_string())
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_disk_dir() -> String {
    "/var/cache/edge-shield".to_string()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            static_manifest: default_static_manifest(),
            protected_image_prefix: default_protected_image_prefix(),
            api_prefix: default_api_prefix(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            serving_origin: None,
            allowed_origins: Vec::new(),
            dev_hosts: default_dev_hosts(),
            dev_referer_markers: default_dev_referer_markers(),
            auth_header: default_auth_header(),
            auth_sentinel: default_auth_sentinel(),
            token_header: default_token_header(),
            protected_header: default_protected_header(),
            protected_sentinel: default_protected_sentinel(),
            bot_signatures: default_bot_signatures(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            max_age_ms: default_token_max_age_ms(),
            clock_skew_ms: default_clock_skew_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tier_prefix: default_tier_prefix(),
            generation: default_generation(),
            placeholder_image: default_placeholder_image(),
            backend: default_backend(),
            disk_dir: default_disk_dir(),
        }
    }
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

impl Default for ShieldConfig {
    fn default() -> Self {
        ShieldConfig {
            listen_address: default_listen_address(),
            upstream_origin: None,
            control_path: default_control_path(),
            classifier: ClassifierConfig::default(),
            policy: PolicyConfig::default(),
            token: TokenConfig::default(),
            cache: CacheConfig::default(),
            metrics_endpoint: None,
        }
    }
}

fn validate_origin(field: &str, origin: &str) -> Result<()> {
    let uri: Uri = origin.parse().map_err(|e| {
        ShieldError::ConfigError(format!("{} '{}' is not a valid origin: {}", field, origin, e))
    })?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(ShieldError::ConfigError(format!(
            "{} '{}' must include a scheme and host",
            field, origin
        )));
    }
    Ok(())
}

fn validate_prefix(field: &str, prefix: &str) -> Result<()> {
    if !prefix.starts_with('/') {
        return Err(ShieldError::ConfigError(format!(
            "{} must start with '/', got '{}'",
            field, prefix
        )));
    }
    Ok(())
}

impl ShieldConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(ShieldConfig)` if loading and validation succeed
    /// * `Err(ShieldError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ShieldError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ShieldConfig = serde_yaml::from_str(content).map_err(|e| {
            ShieldError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - listen_address must be a socket address
    /// - upstream_origin, serving_origin and allowed_origins must be absolute origins
    /// - path prefixes and the control path must start with '/'
    /// - token max age must be > 0
    /// - tier prefix and generation must not be empty
    /// - backend must be "memory" or "disk"
    pub fn validate(&self) -> Result<()> {
        self.listen_address.parse::<SocketAddr>().map_err(|e| {
            ShieldError::ConfigError(format!(
                "listen_address '{}' is invalid: {}",
                self.listen_address, e
            ))
        })?;

        if let Some(upstream) = &self.upstream_origin {
            validate_origin("upstream_origin", upstream)?;
        }
        if let Some(serving) = &self.policy.serving_origin {
            validate_origin("serving_origin", serving)?;
        }
        for origin in &self.policy.allowed_origins {
            validate_origin("allowed_origins entry", origin)?;
        }

        validate_prefix("control_path", &self.control_path)?;
        validate_prefix("protected_image_prefix", &self.classifier.protected_image_prefix)?;
        validate_prefix("api_prefix", &self.classifier.api_prefix)?;

        if self.token.max_age_ms == 0 {
            return Err(ShieldError::ConfigError(
                "token max_age_ms must be greater than 0".to_string(),
            ));
        }

        if self.cache.tier_prefix.is_empty() || self.cache.generation.is_empty() {
            return Err(ShieldError::ConfigError(
                "cache tier_prefix and generation must not be empty".to_string(),
            ));
        }

        match self.cache.backend.as_str() {
            "memory" => {}
            "disk" => {
                if self.cache.disk_dir.is_empty() {
                    return Err(ShieldError::ConfigError(
                        "cache disk_dir must not be empty for the disk backend".to_string(),
                    ));
                }
            }
            other => {
                return Err(ShieldError::ConfigError(format!(
                    "Invalid cache backend '{}', must be 'memory' or 'disk'",
                    other
                )));
            }
        }

        if let Some(metrics) = &self.metrics_endpoint {
            if metrics.enabled {
                metrics.address.parse::<SocketAddr>().map_err(|e| {
                    ShieldError::ConfigError(format!(
                        "metrics_endpoint address '{}' is invalid: {}",
                        metrics.address, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Compare against a freshly loaded configuration
    ///
    /// The running pipeline is never mutated. The returned summary tells the
    /// caller what a rebuild would change; cache-affecting changes mean a new
    /// generation has to be installed.
    ///
    /// # Returns
    /// * `Ok(ConfigChanges)` - Description of what changed
    /// * `Err(ShieldError)` - If the new configuration is invalid
    pub fn diff(&self, new_config: &ShieldConfig) -> Result<ConfigChanges> {
        new_config.validate()?;

        Ok(ConfigChanges {
            listen_address_changed: self.listen_address != new_config.listen_address,
            upstream_changed: self.upstream_origin != new_config.upstream_origin,
            classifier_changed: self.classifier != new_config.classifier,
            policy_changed: self.policy != new_config.policy,
            token_changed: self.token != new_config.token,
            cache_changed: self.cache != new_config.cache,
            metrics_endpoint_changed: self.metrics_endpoint != new_config.metrics_endpoint,
        })
    }
}

/// Description of configuration differences between two loads
#[derive(Debug, Default, Clone)]
pub struct ConfigChanges {
    pub listen_address_changed: bool,
    pub upstream_changed: bool,
    pub classifier_changed: bool,
    pub policy_changed: bool,
    pub token_changed: bool,
    pub cache_changed: bool,
    pub metrics_endpoint_changed: bool,
}

impl ConfigChanges {
    /// Check if any changes were made
    pub fn has_changes(&self) -> bool {
        self.listen_address_changed
            || self.upstream_changed
            || self.classifier_changed
            || self.policy_changed
            || self.token_changed
            || self.cache_changed
            || self.metrics_endpoint_changed
    }

    /// Whether the change requires installing a new cache generation
    pub fn requires_new_generation(&self) -> bool {
        self.cache_changed || self.classifier_changed
    }

    /// Get a summary of changes
    pub fn summary(&self) -> Vec<String> {
        let fields = [
            (self.listen_address_changed, "listen_address"),
            (self.upstream_changed, "upstream_origin"),
            (self.classifier_changed, "classifier"),
            (self.policy_changed, "policy"),
            (self.token_changed, "token"),
            (self.cache_changed, "cache"),
            (self.metrics_endpoint_changed, "metrics_endpoint"),
        ];

        fields
            .iter()
            .filter(|(changed, _)| *changed)
            .map(|(_, name)| name.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShieldConfig::default();
        assert_eq!(config.token.max_age_ms, 300_000);
        assert_eq!(config.token.clock_skew_ms, 1000);
        assert_eq!(config.classifier.protected_image_prefix, "/images/");
        assert_eq!(config.classifier.api_prefix, "/api/");
        assert_eq!(config.cache.backend, "memory");
        assert!(config.policy.bot_signatures.iter().any(|s| s == "curl"));
    }

    #[test]
    fn test_validate_valid_config() {
        let config = ShieldConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_token_age() {
        let mut config = ShieldConfig::default();
        config.token.max_age_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_origin() {
        let mut config = ShieldConfig::default();
        config.policy.allowed_origins = vec!["abphotostudio.in".to_string()];
        assert!(config.validate().is_err());

        config.policy.allowed_origins = vec!["https://www.abphotostudio.in".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_prefix_without_slash() {
        let mut config = ShieldConfig::default();
        config.classifier.api_prefix = "api/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_backend() {
        let mut config = ShieldConfig::default();
        config.cache.backend = "redis".to_string();
        assert!(config.validate().is_err());

        config.cache.backend = "disk".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
upstream_origin: "http://127.0.0.1:3000"
policy:
  serving_origin: "https://www.abphotostudio.in"
  allowed_origins:
    - "https://abphotostudio.in"
cache:
  generation: "v7"
"#;
        let config = ShieldConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.upstream_origin.as_deref(), Some("http://127.0.0.1:3000"));
        assert_eq!(config.cache.generation, "v7");
        assert_eq!(config.cache.tier_prefix, "edge-shield");
        assert_eq!(config.policy.auth_header, "x-image-auth");
    }

    #[test]
    fn test_from_yaml_invalid() {
        assert!(ShieldConfig::from_yaml("token: [1, 2").is_err());
        assert!(ShieldConfig::from_yaml("listen_address: nowhere").is_err());
    }

    #[test]
    fn test_diff() {
        let config = ShieldConfig::default();
        let mut new_config = ShieldConfig::default();

        let changes = config.diff(&new_config).unwrap();
        assert!(!changes.has_changes());
        assert!(changes.summary().is_empty());

        new_config.cache.generation = "v2".to_string();
        new_config.policy.allowed_origins = vec!["https://example.com".to_string()];
        let changes = config.diff(&new_config).unwrap();
        assert!(changes.cache_changed);
        assert!(changes.policy_changed);
        assert!(changes.requires_new_generation());
        assert_eq!(changes.summary(), vec!["policy".to_string(), "cache".to_string()]);
    }

    #[test]
    fn test_diff_rejects_invalid() {
        let config = ShieldConfig::default();
        let mut new_config = ShieldConfig::default();
        new_config.token.max_age_ms = 0;
        assert!(config.diff(&new_config).is_err());
    }
}

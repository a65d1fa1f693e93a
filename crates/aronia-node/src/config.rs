use serde::Deserialize;
use std::path::Path;

/// Trust-delegation policy for inbound introductions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Hex pubkeys whose introductions are accepted without manual review.
    pub auto_accept_from: Vec<String>,
    /// Capability tokens that force manual approval even for trusted
    /// introducers.
    pub require_approval_for: Vec<String>,
}

/// Runtime node configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Capability tokens announced in this node's capability frame.
    pub accepts: Vec<String>,
    /// Period of outbound heartbeat frames, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Maximum inbound silence before a session is torn down, in
    /// milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Request deadline applied when the caller omits one, in milliseconds.
    pub default_request_timeout_ms: u64,
    /// Introductions older than this are rejected, in milliseconds.
    pub introduction_max_age_ms: u64,
    /// Maximum accepted trust-path length on inbound introductions.
    pub max_trust_depth: usize,
    /// How long an outbound write may stay parked before it fails, in
    /// milliseconds.
    pub backpressure_timeout_ms: u64,
    /// Hex pubkeys admitted at startup.
    pub whitelist: Vec<String>,
    /// Trust-delegation policy.
    pub trust: TrustConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            accepts: Vec::new(),
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            default_request_timeout_ms: 30_000,
            introduction_max_age_ms: 86_400_000,
            max_trust_depth: 3,
            backpressure_timeout_ms: 30_000,
            whitelist: Vec::new(),
            trust: TrustConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be greater than 0".to_string());
        }
        if self.heartbeat_interval_ms > 3_600_000 {
            return Err("heartbeat_interval_ms exceeds reasonable limit (1 hour)".to_string());
        }

        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err("heartbeat_timeout_ms must exceed heartbeat_interval_ms".to_string());
        }
        if self.heartbeat_timeout_ms > 86_400_000 {
            return Err("heartbeat_timeout_ms exceeds reasonable limit (1 day)".to_string());
        }

        if self.default_request_timeout_ms == 0 {
            return Err("default_request_timeout_ms must be greater than 0".to_string());
        }

        if self.introduction_max_age_ms == 0 {
            return Err("introduction_max_age_ms must be greater than 0".to_string());
        }

        if self.max_trust_depth == 0 {
            return Err("max_trust_depth must be greater than 0".to_string());
        }
        if self.max_trust_depth > 16 {
            return Err("max_trust_depth exceeds reasonable limit (16)".to_string());
        }

        if self.backpressure_timeout_ms == 0 {
            return Err("backpressure_timeout_ms must be greater than 0".to_string());
        }

        for entry in self.whitelist.iter().chain(&self.trust.auto_accept_from) {
            if aronia_core::hexkey::decode_pubkey(entry).is_err() {
                return Err(format!("invalid hex pubkey in configuration: {entry}"));
            }
        }

        Ok(())
    }
}

/// Loads node configuration from an optional file plus `ARONIA_`-prefixed
/// environment overrides, falling back to defaults.
///
/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<NodeConfig> {
    let mut builder = config::Config::builder();

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    builder = builder.add_source(config::Environment::with_prefix("ARONIA").separator("__"));

    let settings = builder.build()?;
    let cfg: NodeConfig = settings.try_deserialize()?;

    Ok(cfg)
}

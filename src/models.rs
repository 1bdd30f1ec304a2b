use serde::{Deserialize, Serialize};
use crate::core::DdosDetectionConfig;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Interval between sweeps of expired state, in milliseconds (0 disables)
    pub sweep_interval_ms: u64,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// JSON file with extra rules, applied over the defaults
    pub rules_file: Option<String>,
    /// Whether to register the built-in rule set
    pub load_defaults: bool,
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Rate limit configuration
    pub rate_limit: RateLimitConfig,
    /// DDoS detection configuration
    pub ddos_detection: DdosDetectionConfig,
    /// Rule configuration
    pub rule_config: RuleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            rate_limit: RateLimitConfig {
                sweep_interval_ms: 60_000,
            },
            ddos_detection: DdosDetectionConfig::default(),
            rule_config: RuleConfig {
                rules_file: None,
                load_defaults: true,
            },
        }
    }
}

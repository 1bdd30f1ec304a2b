//! Configuration management for the admission guard.
//!
//! This module handles loading and managing application configuration
//! from configuration files and environment variables.

use std::env;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use log::info;

use crate::core::{default_rules, load_rules_file, RuleEngine, RuleEngineError};
use crate::models::{Config, RuleConfig};

/// Load configuration from the config file and environment variables
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("rate_limit.sweep_interval_ms", 60_000)?
        .set_default("ddos_detection.threshold", 1000)?
        .set_default("ddos_detection.window_ms", 1000)?
        .set_default("ddos_detection.block_duration_ms", 60_000)?
        .set_default("ddos_detection.top_offenders", 10)?
        .set_default("rule_config.load_defaults", true)?
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::with_prefix("GUARD").separator("__"))
        .build()?;

    config.try_deserialize()
}

/// Build the rule store described by `config`
pub fn build_rules(config: &RuleConfig) -> Result<RuleEngine, RuleEngineError> {
    let engine = if config.load_defaults {
        RuleEngine::with_rules(default_rules())
    } else {
        RuleEngine::new()
    };

    if let Some(path) = &config.rules_file {
        let rules = load_rules_file(path)?;
        info!("Loaded {} rules from {}", rules.len(), path);
        for rule in rules {
            engine.add_rule(rule);
        }
    }

    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rules_defaults() {
        let engine = build_rules(&RuleConfig {
            rules_file: None,
            load_defaults: true,
        })
        .unwrap();
        assert_eq!(engine.get_rules().len(), 4);

        let empty = build_rules(&RuleConfig {
            rules_file: None,
            load_defaults: false,
        })
        .unwrap();
        assert!(empty.get_rules().is_empty());
    }

    #[test]
    fn test_build_rules_file_overrides_default() {
        let path = env::temp_dir().join(format!("guard-config-rules-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"name":"auth_attempts","maxRequests":3,"timeWindow":30000,"onLimitExceeded":"block"}]"#,
        )
        .unwrap();

        let engine = build_rules(&RuleConfig {
            rules_file: Some(path.to_string_lossy().into_owned()),
            load_defaults: true,
        })
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(engine.get_rules().len(), 4);
        assert_eq!(engine.get_rule("auth_attempts").unwrap().max_requests, 3);
    }

    #[test]
    fn test_build_rules_missing_file() {
        let result = build_rules(&RuleConfig {
            rules_file: Some("/no/such/rules.json".to_string()),
            load_defaults: true,
        });
        assert!(matches!(result, Err(RuleEngineError::Io(_))));
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config().unwrap();
        assert_eq!(config.ddos_detection.threshold, 1000);
        assert_eq!(config.ddos_detection.window_ms, 1000);
        assert_eq!(config.ddos_detection.block_duration_ms, 60_000);
        assert_eq!(config.ddos_detection.top_offenders, 10);
        assert_eq!(config.rate_limit.sweep_interval_ms, 60_000);
        assert!(config.rule_config.load_defaults);
    }
}

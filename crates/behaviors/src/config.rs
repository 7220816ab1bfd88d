//! Listener-level defaults and builders

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use service_builder::builder;

use crate::error::{BehaviorError, BehaviorResult};

/// Defaults applied when a class's extension configuration leaves an option out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct BehaviorConfig {
    /// Separator between slug words
    #[builder(default = "\"-\".to_string()", getter)]
    pub slug_separator: String,

    /// Format used when a date field is a slug source
    #[builder(default = "\"%Y-%m-%d-%H:%M\".to_string()", getter)]
    pub slug_date_format: String,

    /// Format used when a date field is a path source
    #[builder(default = "\"%Y-%m-%d\".to_string()", getter)]
    pub path_date_format: String,

    /// Separator between materialized path segments
    #[builder(default = "\",\".to_string()", getter)]
    pub path_separator: String,

    /// How long a materialized path tree lock stays valid
    #[builder(default = "Duration::from_secs(3)", getter)]
    pub locking_timeout: Duration,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            slug_separator: "-".to_string(),
            slug_date_format: "%Y-%m-%d-%H:%M".to_string(),
            path_date_format: "%Y-%m-%d".to_string(),
            path_separator: ",".to_string(),
            locking_timeout: Duration::from_secs(3),
        }
    }
}

impl BehaviorConfig {
    /// Load defaults from `ELIF_BEHAVIORS_*` environment variables
    pub fn from_env() -> BehaviorResult<Self> {
        let defaults = Self::default();

        let slug_separator =
            env::var("ELIF_BEHAVIORS_SLUG_SEPARATOR").unwrap_or(defaults.slug_separator);
        let path_separator =
            env::var("ELIF_BEHAVIORS_PATH_SEPARATOR").unwrap_or(defaults.path_separator);
        let locking_timeout = match env::var("ELIF_BEHAVIORS_LOCKING_TIMEOUT") {
            Ok(value) => value
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| {
                    BehaviorError::configuration(
                        "environment",
                        format!(
                            "ELIF_BEHAVIORS_LOCKING_TIMEOUT must be a number of seconds, got '{}'",
                            value
                        ),
                    )
                })?,
            Err(_) => defaults.locking_timeout,
        };

        if path_separator.is_empty() {
            return Err(BehaviorError::configuration(
                "environment",
                "ELIF_BEHAVIORS_PATH_SEPARATOR cannot be empty",
            ));
        }

        Ok(Self {
            slug_separator,
            slug_date_format: defaults.slug_date_format,
            path_date_format: defaults.path_date_format,
            path_separator,
            locking_timeout,
        })
    }
}

impl BehaviorConfigBuilder {
    /// Configuration for tests: short lock timeout
    pub fn testing() -> Self {
        BehaviorConfigBuilder::new().locking_timeout(Duration::from_millis(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_behavior_config() {
        let config = BehaviorConfig::default();
        assert_eq!(config.slug_separator, "-");
        assert_eq!(config.path_separator, ",");
        assert_eq!(config.locking_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_behavior_config_builder() {
        let config = BehaviorConfigBuilder::new()
            .slug_separator("_".to_string())
            .build()
            .expect("Failed to build config");

        assert_eq!(config.get_slug_separator(), "_");
        assert_eq!(config.get_path_separator(), ","); // Default
        assert_eq!(config.get_path_date_format(), "%Y-%m-%d");
    }

    #[test]
    fn test_testing_config() {
        let config = BehaviorConfigBuilder::testing()
            .build()
            .expect("Failed to build config");
        assert_eq!(config.locking_timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_from_env() {
        env::set_var("ELIF_BEHAVIORS_SLUG_SEPARATOR", "_");
        env::set_var("ELIF_BEHAVIORS_LOCKING_TIMEOUT", "10");

        let config = BehaviorConfig::from_env().unwrap();
        assert_eq!(config.slug_separator, "_");
        assert_eq!(config.locking_timeout, Duration::from_secs(10));

        env::set_var("ELIF_BEHAVIORS_LOCKING_TIMEOUT", "soon");
        assert!(BehaviorConfig::from_env().is_err());

        env::remove_var("ELIF_BEHAVIORS_SLUG_SEPARATOR");
        env::remove_var("ELIF_BEHAVIORS_LOCKING_TIMEOUT");
    }
}

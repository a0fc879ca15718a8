use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub liquidation: LiquidationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Drop destroyed agents from every index (false keeps them with status
    /// `Destroyed`, outside live iteration)
    #[serde(default = "default_true")]
    pub hard_delete_on_destroy: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            hard_delete_on_destroy: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// How long shutdown waits for background threads, in milliseconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

fn default_shutdown_grace() -> u64 {
    5_000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiquidationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Revert reasons that mean another actor got there first
    #[serde(default = "default_expected_errors")]
    pub expected_errors: Vec<String>,
}

fn default_expected_errors() -> Vec<String> {
    vec![
        "liquidation not started".to_string(),
        "cannot stop liquidation".to_string(),
        "already in liquidation".to_string(),
    ]
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expected_errors: default_expected_errors(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "synthwatch".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
            file_prefix: default_file_prefix(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("tracker.hard_delete_on_destroy", true)?
            .set_default("runner.shutdown_grace_ms", default_shutdown_grace())?
            .set_default("liquidation.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SYNTHWATCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SYNTHWATCH_TRACKER__HARD_DELETE_ON_DESTROY, etc.)
            .add_source(
                Environment::with_prefix("SYNTHWATCH")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("liquidation.expected_errors"),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.runner.shutdown_grace_ms == 0 {
            errors.push("runner.shutdown_grace_ms must be positive".to_string());
        }

        if self
            .liquidation
            .expected_errors
            .iter()
            .any(|reason| reason.trim().is_empty())
        {
            errors.push("liquidation.expected_errors must not contain empty reasons".to_string());
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            errors.push(format!("logging.level is not a valid filter: {}", self.logging.level));
        }

        if matches!(&self.logging.dir, Some(dir) if dir.trim().is_empty()) {
            errors.push("logging.dir must not be empty when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let config = AppConfig::load_from("/nonexistent/synthwatch-config").unwrap();
        assert!(config.tracker.hard_delete_on_destroy);
        assert!(config.liquidation.enabled);
        assert_eq!(config.liquidation.expected_errors.len(), 3);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = AppConfig::default();
        config.runner.shutdown_grace_ms = 0;
        config.liquidation.expected_errors.push("  ".to_string());
        config.logging.dir = Some(String::new());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}

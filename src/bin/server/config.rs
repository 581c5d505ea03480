//! Server configuration
//!
//! Read from the TOML file named by `RISKPULSE_CONFIG`, else `./riskpulse.toml`,
//! else built-in defaults.

use riskpulse::PipelineConfig;
use serde::Deserialize;
use tracing::{info, warn};

/// Environment variable holding the configuration path
pub const CONFIG_ENV: &str = "RISKPULSE_CONFIG";

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "riskpulse.toml";

/// Server configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Telemetry pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse and validate a configuration file's contents
    pub fn parse(content: &str) -> Result<Self, String> {
        let config: ServerConfig = toml::from_str(content).map_err(|e| e.to_string())?;
        config.pipeline.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

/// Load configuration from file or environment
pub fn load_config() -> ServerConfig {
    // Check environment variable first
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        match std::fs::read_to_string(&path) {
            Ok(content) => match ServerConfig::parse(&content) {
                Ok(config) => {
                    info!(path = %path, "Loaded configuration from file");
                    return config;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to parse config file, using defaults");
                }
            },
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to read config file, using defaults");
            }
        }
    }

    // Check default config file
    if let Ok(content) = std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
        match ServerConfig::parse(&content) {
            Ok(config) => {
                info!("Loaded configuration from {}", DEFAULT_CONFIG_FILE);
                return config;
            }
            Err(e) => {
                warn!(error = %e, "Ignoring invalid {}", DEFAULT_CONFIG_FILE);
            }
        }
    }

    info!("Using default configuration");
    ServerConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_pipeline() {
        let config = ServerConfig::parse(
            r#"
            listen_addr = "127.0.0.1:9000"

            [pipeline]
            regulator_risk_threshold = 80

            [pipeline.rate_limit]
            redis_url = "redis://127.0.0.1:6379"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.pipeline.regulator_risk_threshold, 80);
        assert_eq!(
            config.pipeline.rate_limit.redis_url.as_deref(),
            Some("redis://127.0.0.1:6379")
        );
        assert_eq!(config.pipeline.window.size, 20);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_invalid_pipeline_rejected() {
        assert!(ServerConfig::parse("[pipeline.window]\nsize = 0\n").is_err());
    }
}

//! Advisor configuration

use advisor_lib::models::pools;
use advisor_lib::server::ServerConfig;
use anyhow::{ensure, Result};
use serde::Deserialize;
use std::time::Duration;

/// Advisor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Unix socket the CPUAdvisor service listens on
    #[serde(default = "default_advisor_socket_path")]
    pub advisor_socket_path: String,

    /// Unix socket of the CPU plugin
    #[serde(default = "default_plugin_socket_path")]
    pub plugin_socket_path: String,

    /// Advisory loop period in seconds
    #[serde(default = "default_period")]
    pub period_secs: u64,

    /// Pushes are suppressed for this many seconds after start
    #[serde(default = "default_startup_period")]
    pub startup_period_secs: u64,

    /// Seconds of consecutive tick failures before reporting unhealthy
    #[serde(default = "default_health_toleration")]
    pub health_toleration_secs: u64,

    /// Kubelet read-only endpoint used for pod lookups
    #[serde(default = "default_kubelet_endpoint")]
    pub kubelet_endpoint: String,

    /// Timeout of one kubelet pod list request in seconds
    #[serde(default = "default_kubelet_timeout")]
    pub kubelet_timeout_secs: u64,

    /// Maximum age of the cached kubelet pod list in seconds
    #[serde(default = "default_kubelet_refresh")]
    pub kubelet_refresh_secs: u64,

    /// Pool that must exist before advice is pushed
    #[serde(default = "default_reserve_pool_name")]
    pub reserve_pool_name: String,

    /// Whether shared-cores pools may overlap reclaimed-cores pools
    #[serde(default)]
    pub allow_shared_overlap_reclaimed: bool,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_advisor_socket_path() -> String {
    "/var/lib/katalyst/qrm_advisor/cpu_advisor.sock".to_string()
}

fn default_plugin_socket_path() -> String {
    "/var/lib/katalyst/qrm_advisor/cpu_plugin.sock".to_string()
}

fn default_period() -> u64 {
    5
}

fn default_startup_period() -> u64 {
    30
}

fn default_health_toleration() -> u64 {
    300
}

fn default_kubelet_endpoint() -> String {
    "http://127.0.0.1:10255".to_string()
}

fn default_kubelet_timeout() -> u64 {
    5
}

fn default_kubelet_refresh() -> u64 {
    5
}

fn default_reserve_pool_name() -> String {
    pools::RESERVE.to_string()
}

impl AdvisorConfig {
    /// Load configuration from an optional file and `ADVISOR_` environment
    /// variables, environment taking precedence.
    ///
    /// The file is read from `ADVISOR_CONFIG_FILE` when set.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("ADVISOR_CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("ADVISOR").try_parsing(true))
            .build()?;

        Self::from_config(config)
    }

    fn from_config(config: config::Config) -> Result<Self> {
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.period_secs > 0, "period_secs must be positive");
        ensure!(
            !self.advisor_socket_path.is_empty(),
            "advisor_socket_path must not be empty"
        );
        ensure!(
            !self.plugin_socket_path.is_empty(),
            "plugin_socket_path must not be empty"
        );
        ensure!(
            !self.reserve_pool_name.is_empty(),
            "reserve_pool_name must not be empty"
        );
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn kubelet_timeout(&self) -> Duration {
        Duration::from_secs(self.kubelet_timeout_secs)
    }

    pub fn kubelet_refresh(&self) -> Duration {
        Duration::from_secs(self.kubelet_refresh_secs)
    }

    /// Settings of the advisory loop
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            period: self.period(),
            startup_period: Duration::from_secs(self.startup_period_secs),
            health_toleration: Duration::from_secs(self.health_toleration_secs),
            reserve_pool_name: self.reserve_pool_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn parse(toml: &str) -> Result<AdvisorConfig> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        AdvisorConfig::from_config(config)
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.period_secs, 5);
        assert_eq!(config.startup_period_secs, 30);
        assert_eq!(config.reserve_pool_name, "reserve");
        assert!(!config.allow_shared_overlap_reclaimed);
        assert_eq!(config.kubelet_refresh(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = parse(
            r#"
            period_secs = 2
            plugin_socket_path = "/tmp/plugin.sock"
            allow_shared_overlap_reclaimed = true
            kubelet_refresh_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.plugin_socket_path, "/tmp/plugin.sock");
        assert!(config.allow_shared_overlap_reclaimed);
        let server = config.server_config();
        assert_eq!(server.period, Duration::from_secs(2));
        assert_eq!(server.startup_period, Duration::from_secs(30));
        assert_eq!(config.kubelet_refresh(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_period_rejected() {
        let err = parse("period_secs = 0").unwrap_err();
        assert!(err.to_string().contains("period_secs"));
    }
}

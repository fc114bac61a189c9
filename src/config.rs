//! Configuration management for the swap coordinator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub monitor: MonitorConfig,
    pub pagination: PaginationConfig,
    pub orders: OrderRulesConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_page: u32,
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page: 1,
            default_limit: 10,
            max_limit: 100,
        }
    }
}

impl PaginationConfig {
    /// Clamp requested paging into range; absent values take the defaults
    pub fn clamp(&self, page: Option<i64>, limit: Option<i64>) -> (u32, u32) {
        let page = page
            .unwrap_or(self.default_page as i64)
            .max(1)
            .min(u32::MAX as i64) as u32;
        let limit = limit
            .unwrap_or(self.default_limit as i64)
            .clamp(1, self.max_limit.max(1) as i64) as u32;
        (page, limit)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderRulesConfig {
    pub supported_chains: Vec<String>,
    /// Read-modify-CAS attempts before a mutator gives up with a conflict
    pub cas_attempts: u32,
}

impl Default for OrderRulesConfig {
    fn default() -> Self {
        Self {
            supported_chains: ["EVM", "TON", "Cardano", "Ethereum", "Polygon", "BSC"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            cas_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_COORDINATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.monitor.interval_secs == 0 {
            anyhow::bail!("monitor.interval_secs must be at least 1");
        }
        if self.monitor.event_buffer == 0 {
            anyhow::bail!("monitor.event_buffer must be at least 1");
        }

        let p = &self.pagination;
        if p.max_limit == 0 || p.default_limit == 0 || p.default_limit > p.max_limit {
            anyhow::bail!("pagination limits must satisfy 1 <= default_limit <= max_limit");
        }
        if p.default_page == 0 {
            anyhow::bail!("pagination.default_page must be at least 1");
        }

        if self.orders.supported_chains.len() < 2 {
            anyhow::bail!("At least two supported chains must be configured");
        }
        if self.orders.cas_attempts == 0 {
            anyhow::bail!("orders.cas_attempts must be at least 1");
        }

        if self.database.backend == StoreBackend::Postgres && self.database.url.is_empty() {
            anyhow::bail!("database.url is required for the postgres backend");
        }
        if self.database.backend == StoreBackend::Memory {
            tracing::warn!("Using in-memory order store - orders will not survive a restart");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

//! Production configuration system
//!
//! Provides centralized configuration management with:
//! - Environment variable support
//! - Config file loading (optional)
//! - Runtime defaults
//! - Validation and type safety

use crate::allocator::CapPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Linode API collaborator configuration
    pub api: ApiConfig,

    /// Event cache configuration
    pub cache: CacheConfig,

    /// Pricing catalog configuration
    pub pricing: PricingConfig,

    /// Cost allocation configuration
    pub billing: BillingConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// Paths configuration
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Personal access token; only ever read from the environment or file.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub page_size: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub refresh_interval_minutes: i64,
    pub safety_margin_minutes: i64,
    pub max_age_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub ttl_minutes: i64,
    pub storage_base_fee: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    pub cap_policy: CapPolicy,
    pub default_rate_class: String,
    pub object_storage_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub json_pretty: bool,
    pub show_line_items: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub cache_file: PathBuf,
    pub log_directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "WARN".to_string(),
                format: "pretty".to_string(),
                output: "console".to_string(),
            },
            api: ApiConfig {
                base_url: "https://api.linode.com/v4".to_string(),
                token: None,
                timeout_secs: 30,
                page_size: 500,
                max_retries: 1,
            },
            cache: CacheConfig {
                refresh_interval_minutes: 60,
                safety_margin_minutes: 60,
                max_age_hours: 24,
            },
            pricing: PricingConfig {
                ttl_minutes: 60,
                storage_base_fee: 5.0,
            },
            billing: BillingConfig {
                cap_policy: CapPolicy::PerSession,
                default_rate_class: "g6-standard-4".to_string(),
                object_storage_enabled: true,
            },
            output: OutputConfig {
                json_pretty: true,
                show_line_items: false,
            },
            paths: PathsConfig {
                cache_file: dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("linode-billing")
                    .join("events.json"),
                log_directory: PathBuf::from("logs"),
            },
        }
    }
}

impl Config {
    /// Load configuration from environment, file, and defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // Try to load from config file if it exists
        let config_paths = [
            PathBuf::from("linode-billing.toml"),
            PathBuf::from(".linode-billing.toml"),
            dirs::config_dir()
                .map(|d| d.join("linode-billing").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        // Override with environment variables
        config.apply_env_overrides()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        // Logging overrides
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        // API overrides
        if let Ok(val) = env::var("LINODE_TOKEN") {
            self.api.token = Some(val);
        }
        if let Ok(val) = env::var("LINODE_API_URL") {
            self.api.base_url = val;
        }
        if let Ok(val) = env::var("LINODE_BILLING_TIMEOUT_SECS") {
            self.api.timeout_secs = val.parse()
                .context("Invalid LINODE_BILLING_TIMEOUT_SECS")?;
        }
        if let Ok(val) = env::var("LINODE_BILLING_PAGE_SIZE") {
            self.api.page_size = val.parse()
                .context("Invalid LINODE_BILLING_PAGE_SIZE")?;
        }

        // Cache overrides
        if let Ok(val) = env::var("LINODE_BILLING_REFRESH_MINUTES") {
            self.cache.refresh_interval_minutes = val.parse()
                .context("Invalid LINODE_BILLING_REFRESH_MINUTES")?;
        }
        if let Ok(val) = env::var("LINODE_BILLING_MAX_CACHE_AGE_HOURS") {
            self.cache.max_age_hours = val.parse()
                .context("Invalid LINODE_BILLING_MAX_CACHE_AGE_HOURS")?;
        }

        // Billing overrides
        if let Ok(val) = env::var("LINODE_BILLING_CAP_POLICY") {
            self.billing.cap_policy = val.parse()
                .context("Invalid LINODE_BILLING_CAP_POLICY")?;
        }
        if let Ok(val) = env::var("LINODE_BILLING_STORAGE_ENABLED") {
            self.billing.object_storage_enabled = val.parse()
                .context("Invalid LINODE_BILLING_STORAGE_ENABLED")?;
        }
        if let Ok(val) = env::var("LINODE_BILLING_STORAGE_FEE") {
            self.pricing.storage_base_fee = val.parse()
                .context("Invalid LINODE_BILLING_STORAGE_FEE")?;
        }

        // Path overrides
        if let Ok(val) = env::var("LINODE_BILLING_CACHE_FILE") {
            self.paths.cache_file = PathBuf::from(val);
        }
        if let Ok(val) = env::var("LINODE_BILLING_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.api.timeout_secs == 0 {
            return Err(anyhow::anyhow!("API timeout must be greater than 0"));
        }

        if !(25..=500).contains(&self.api.page_size) {
            return Err(anyhow::anyhow!(
                "Page size must be between 25 and 500, got {}",
                self.api.page_size
            ));
        }

        if self.cache.refresh_interval_minutes <= 0 {
            return Err(anyhow::anyhow!("Cache refresh interval must be positive"));
        }

        if self.cache.safety_margin_minutes < 0 {
            return Err(anyhow::anyhow!("Cache safety margin cannot be negative"));
        }

        if self.cache.max_age_hours * 60 < self.cache.refresh_interval_minutes {
            warn!(
                max_age_hours = self.cache.max_age_hours,
                refresh_interval_minutes = self.cache.refresh_interval_minutes,
                "Cache max age is shorter than the refresh interval, every load will rebuild"
            );
        }

        if self.pricing.ttl_minutes <= 0 {
            return Err(anyhow::anyhow!("Pricing TTL must be positive"));
        }

        if self.pricing.storage_base_fee < 0.0 {
            return Err(anyhow::anyhow!("Storage base fee cannot be negative"));
        }

        if self.billing.default_rate_class.trim().is_empty() {
            return Err(anyhow::anyhow!("Default rate class cannot be empty"));
        }

        // Validate paths exist (create if needed)
        if matches!(self.logging.output.as_str(), "file" | "both")
            && !self.paths.log_directory.exists()
        {
            fs::create_dir_all(&self.paths.log_directory)
                .context("Failed to create log directory")?;
        }

        Ok(())
    }

    /// Save current configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!(path = %path.display(), "Configuration saved to file");

        Ok(())
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}

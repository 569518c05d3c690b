use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use skyfollow::bsky::{DEFAULT_API_BASE, XrpcConfig};
use skyfollow::producer::DiscoveryConfig;
use skyfollow::scheduler::{DispatcherConfig, RateLimitConfig, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bluesky: BlueskyConfig,
    pub dispatch: DispatchConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueskyConfig {
    pub api_base: String,
    pub identifier: String,
    pub password: String,
    pub timeout_secs: u64,
    pub fallback_handles: Vec<String>,
    pub suggestions_limit: u32,
    pub discovery_delay_ms: u64,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            identifier: String::new(),
            password: String::new(),
            timeout_secs: 10,
            fallback_handles: Vec::new(),
            suggestions_limit: 50,
            discovery_delay_ms: 1000,
        }
    }
}

impl BlueskyConfig {
    pub fn xrpc(&self) -> XrpcConfig {
        XrpcConfig {
            api_base: self.api_base.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            suggestions_limit: self.suggestions_limit,
            fallback_handles: self.fallback_handles.clone(),
            delay: Duration::from_millis(self.discovery_delay_ms),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.identifier.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_follows_per_hour: u32,
    pub rate_window_secs: u64,
    pub follow_cooldown_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub poll_interval_ms: u64,
    pub idle_poll_secs: u64,
    pub simulate: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_follows_per_hour: 50,
            rate_window_secs: 3600,
            follow_cooldown_secs: 86400,
            max_retries: 3,
            retry_delay_secs: 300,
            poll_interval_ms: 1000,
            idle_poll_secs: 60,
            simulate: true,
        }
    }
}

impl DispatchConfig {
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            rate: RateLimitConfig::new(
                self.max_follows_per_hour,
                secs(self.rate_window_secs),
                secs(self.follow_cooldown_secs),
            ),
            retry: RetryPolicy::new(self.max_retries, secs(self.retry_delay_secs)),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            idle_poll: Duration::from_secs(self.idle_poll_secs),
            simulate: self.simulate,
        }
    }
}

/// Seconds as a chrono duration, clamped to the largest value it can hold.
fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("skyfollow")
                .join("accounts.db"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bluesky: BlueskyConfig::default(),
            dispatch: DispatchConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply BSKY_* overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Environment overrides; invalid timeouts are ignored
    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(identifier) = var("BSKY_IDENTIFIER").filter(|v| !v.is_empty()) {
            self.bluesky.identifier = identifier;
        }
        if let Some(password) = var("BSKY_PASSWORD").filter(|v| !v.is_empty()) {
            self.bluesky.password = password;
        }
        if let Some(raw) = var("BSKY_TIMEOUT") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.bluesky.timeout_secs = secs,
                _ => log::warn!("Ignoring invalid BSKY_TIMEOUT={:?}", raw),
            }
        }
        if let Some(raw) = var("BSKY_FALLBACK_HANDLES") {
            let handles: Vec<String> = raw
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
            if !handles.is_empty() {
                self.bluesky.fallback_handles = handles;
            }
        }
    }
}

//! Configuration loading from TOML files
//!
//! The service base URL is additionally persisted through a small key-value
//! settings store, so an operator can re-point a kiosk without shipping a new
//! config file. Absent a stored value, the hard-coded default applies.

use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Key under which the device-service base URL is persisted
pub const BASE_URL_KEY: &str = "device_service_base_url";

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub username: String,
    pub password: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_ms: u64,
    /// Probe opens wait on slow hardware connection establishment
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    15000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout_ms(),
            request_ms: default_request_timeout_ms(),
            probe_ms: default_probe_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Bounded per-denomination delta history kept for diagnostics
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_history_len() -> usize {
    32
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: default_poll_interval_ms(), history_len: default_history_len() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_change_enabled")]
    pub change_enabled: bool,
    /// Denomination values (minor units) routed to the recycler, i.e.
    /// eligible for payout as change
    #[serde(default = "default_recycler_values")]
    pub recycler_values: Vec<i64>,
}

fn default_currency() -> String {
    "ISK".to_string()
}

fn default_change_enabled() -> bool {
    true
}

fn default_recycler_values() -> Vec<i64> {
    vec![50, 100, 500, 1000]
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            change_enabled: default_change_enabled(),
            recycler_values: default_recycler_values(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
}

/// Main configuration struct used throughout the library
#[derive(Debug, Clone)]
pub struct Config {
    base_url: String,
    username: String,
    password: String,
    connect_timeout_ms: u64,
    request_timeout_ms: u64,
    probe_timeout_ms: u64,
    poll_interval_ms: u64,
    history_len: usize,
    currency: String,
    change_enabled: bool,
    recycler_values: Vec<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: "kiosk".to_string(),
            password: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            history_len: default_history_len(),
            currency: default_currency(),
            change_enabled: default_change_enabled(),
            recycler_values: default_recycler_values(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            base_url: toml_config.service.base_url,
            username: toml_config.service.username,
            password: toml_config.service.password,
            connect_timeout_ms: toml_config.timeouts.connect_ms,
            request_timeout_ms: toml_config.timeouts.request_ms,
            probe_timeout_ms: toml_config.timeouts.probe_ms,
            poll_interval_ms: toml_config.polling.interval_ms,
            history_len: toml_config.polling.history_len,
            currency: toml_config.payment.currency,
            change_enabled: toml_config.payment.change_enabled,
            recycler_values: toml_config.payment.recycler_values,
        })
    }

    /// Load from a path, falling back to defaults when the file is missing
    /// or unreadable. Kiosks must come up even with a botched deploy.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "config_load_failed_using_defaults"
                );
                Self::default()
            }
        }
    }

    /// Override the service base URL (e.g. with a settings-store value)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_change_enabled(mut self, enabled: bool) -> Self {
        self.change_enabled = enabled;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn connect_timeout_ms(&self) -> u64 {
        self.connect_timeout_ms
    }

    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
    }

    pub fn probe_timeout_ms(&self) -> u64 {
        self.probe_timeout_ms
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn change_enabled(&self) -> bool {
        self.change_enabled
    }

    pub fn recycler_values(&self) -> &[i64] {
        &self.recycler_values
    }
}

/// Durable key-value store for the handful of settings that outlive a config
/// file deploy. The core only needs string get/put.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Settings store backed by a single TOML file of string pairs
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> anyhow::Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings file {}", self.path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {}", self.path.display()))
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut all = self.read_all()?;
        all.insert(key.to_string(), value.to_string());
        let content = toml::to_string(&all).context("Failed to serialize settings")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write settings file {}", self.path.display()))
    }
}

/// Base URL from the settings store, falling back to the hard-coded default
/// when nothing is stored or the store is unreadable.
pub fn resolve_base_url(store: &dyn SettingsStore) -> String {
    match store.get(BASE_URL_KEY) {
        Ok(Some(url)) if !url.trim().is_empty() => url,
        Ok(_) => DEFAULT_BASE_URL.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "settings_store_read_failed");
            DEFAULT_BASE_URL.to_string()
        }
    }
}

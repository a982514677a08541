//! # Sync Configuration
//!
//! Configuration for the resilience layer and the sync agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     HAVEN_CLOUD_URL=https://api.haven.example/v1                       │
//! │     HAVEN_DEVICE_ID=abc-123                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/haven-pos/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.haven.haven-pos/sync.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated device_id, retry 5 x 500ms, breaker 5 / 30s         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [cloud]
//! base_url = "https://api.haven.example/v1"
//! push_url = "wss://push.haven.example/v1/socket"
//! api_key = "hk_live_..."
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! jitter_factor = 0.2
//!
//! [breaker]
//! failure_threshold = 5
//! recovery_time_ms = 30000
//! half_open_max_attempts = 2
//!
//! [connectivity]
//! probe_interval_secs = 30
//! downgrade_after = 3
//! service_host_url = "http://192.168.1.10:8080/health"
//! local_agent_url = "http://127.0.0.1:9100/health"
//!
//! [sync]
//! delta_interval_secs = 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use haven_core::SyncSchema;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Generated on first run and written to `sync.toml` by [`SyncConfig::load`].
    pub id: String,

    /// Human-readable device name (e.g., "Register 1", "Kitchen Node").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Cloud Settings
// =============================================================================

/// Where the cloud lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// Base URL for REST calls. Paths below are joined onto it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// WebSocket URL for pushed updates. No push socket when unset.
    #[serde(default)]
    pub push_url: Option<String>,

    /// Bearer API key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request deadline (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// TCP/TLS connect deadline (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Full snapshot endpoint.
    #[serde(default = "default_full_sync_path")]
    pub full_sync_path: String,

    /// Delta endpoint, queried with `?since=<version>`.
    #[serde(default = "default_delta_path")]
    pub delta_path: String,

    /// Push topic carrying `{version, changes}` batches.
    #[serde(default = "default_push_topic")]
    pub push_topic: String,

    /// Health endpoint used by the reachability prober.
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_base_url() -> String {
    "https://api.haven-pos.example/v1/".to_string()
}
fn default_request_timeout() -> u64 {
    15
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_full_sync_path() -> String {
    "config/full".to_string()
}
fn default_delta_path() -> String {
    "config/changes".to_string()
}
fn default_push_topic() -> String {
    "config.updated".to_string()
}
fn default_health_path() -> String {
    "health".to_string()
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            base_url: default_base_url(),
            push_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            full_sync_path: default_full_sync_path(),
            delta_path: default_delta_path(),
            push_topic: default_push_topic(),
            health_path: default_health_path(),
        }
    }
}

impl CloudSettings {
    /// Per-request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Retry + Breaker Settings
// =============================================================================

/// Retry schedule for cloud calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Jitter amplitude as a fraction of the delay, in [0, 1].
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_factor: default_jitter(),
        }
    }
}

/// Circuit breaker thresholds for cloud resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_time")]
    pub recovery_time_ms: u64,

    #[serde(default = "default_half_open_max")]
    pub half_open_max_attempts: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_time() -> u64 {
    30_000
}
fn default_half_open_max() -> u32 {
    2
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerSettings {
            failure_threshold: default_failure_threshold(),
            recovery_time_ms: default_recovery_time(),
            half_open_max_attempts: default_half_open_max(),
        }
    }
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Reachability probing and tier hysteresis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// Interval between probes (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Deadline for each probe request (milliseconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Consecutive lower-tier probes required before downgrading.
    #[serde(default = "default_downgrade_after")]
    pub downgrade_after: u32,

    /// Local service host health URL (Yellow tier).
    #[serde(default)]
    pub service_host_url: Option<String>,

    /// Local device agent health URL (Orange tier).
    #[serde(default)]
    pub local_agent_url: Option<String>,
}

fn default_probe_interval() -> u64 {
    30
}
fn default_probe_timeout() -> u64 {
    3_000
}
fn default_downgrade_after() -> u32 {
    3
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            probe_interval_secs: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout(),
            downgrade_after: default_downgrade_after(),
            service_host_url: None,
            local_agent_url: None,
        }
    }
}

impl ConnectivitySettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync scheduling and local cache location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between delta polls (seconds).
    #[serde(default = "default_delta_interval")]
    pub delta_interval_secs: u64,

    /// SQLite cache file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_delta_interval() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            delta_interval_secs: default_delta_interval(),
            database_path: None,
        }
    }
}

impl SyncSettings {
    pub fn delta_interval(&self) -> Duration {
        Duration::from_secs(self.delta_interval_secs)
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub sync: SyncSettings,

    /// Collections and scalar keys to sync.
    #[serde(default)]
    pub schema: SyncSchema,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    ///
    /// When the file is missing, the defaults are written to it so the
    /// generated device ID survives restarts. Environment overrides are
    /// applied after that write and never persisted.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, writing defaults");
                if let Err(e) = config.save(Some(path)) {
                    warn!(error = %e, "Could not persist generated config, device ID is per-process");
                }
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        require_scheme("cloud.base_url", &self.cloud.base_url, &["http", "https"])?;

        if let Some(ref url) = self.cloud.push_url {
            require_scheme("cloud.push_url", url, &["ws", "wss"])?;
        }
        if let Some(ref url) = self.connectivity.service_host_url {
            require_scheme("connectivity.service_host_url", url, &["http", "https"])?;
        }
        if let Some(ref url) = self.connectivity.local_agent_url {
            require_scheme("connectivity.local_agent_url", url, &["http", "https"])?;
        }

        if self.retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(SyncError::InvalidConfig(format!(
                "retry.jitter_factor must be within [0, 1], got {}",
                self.retry.jitter_factor
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(SyncError::InvalidConfig(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(SyncError::InvalidConfig(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.breaker.half_open_max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "breaker.half_open_max_attempts must be at least 1".into(),
            ));
        }

        if self.connectivity.downgrade_after == 0 {
            return Err(SyncError::InvalidConfig(
                "connectivity.downgrade_after must be at least 1".into(),
            ));
        }
        if self.connectivity.probe_interval_secs == 0 || self.sync.delta_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe and delta intervals must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("HAVEN_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(url) = std::env::var("HAVEN_CLOUD_URL") {
            debug!(url = %url, "Overriding cloud URL from environment");
            self.cloud.base_url = url;
        }

        if let Ok(url) = std::env::var("HAVEN_PUSH_URL") {
            debug!(url = %url, "Overriding push URL from environment");
            self.cloud.push_url = Some(url);
        }

        if let Ok(key) = std::env::var("HAVEN_API_KEY") {
            self.cloud.api_key = Some(key);
        }

        if let Ok(url) = std::env::var("HAVEN_SERVICE_HOST_URL") {
            self.connectivity.service_host_url = Some(url);
        }

        if let Ok(url) = std::env::var("HAVEN_LOCAL_AGENT_URL") {
            self.connectivity.local_agent_url = Some(url);
        }

        if let Ok(path) = std::env::var("HAVEN_DATABASE_PATH") {
            self.sync.database_path = Some(PathBuf::from(path));
        }

        if let Ok(secs) = std::env::var("HAVEN_DELTA_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.delta_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid HAVEN_DELTA_INTERVAL_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "haven", "haven-pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the SQLite cache path: configured, or the platform data dir.
    pub fn database_path(&self) -> PathBuf {
        self.sync.database_path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "haven", "haven-pos")
                .map(|dirs| dirs.data_dir().join("config-cache.db"))
                .unwrap_or_else(|| PathBuf::from("haven-config-cache.db"))
        })
    }

    /// Returns the push URL if configured.
    pub fn push_url(&self) -> Option<&str> {
        self.cloud.push_url.as_deref()
    }
}

fn require_scheme(field: &str, raw: &str, schemes: &[&str]) -> SyncResult<()> {
    let url = Url::parse(raw)
        .map_err(|e| SyncError::InvalidUrl(format!("{}: {} ({})", field, raw, e)))?;

    if !schemes.contains(&url.scheme()) {
        return Err(SyncError::InvalidUrl(format!(
            "{} must use {}, got: {}",
            field,
            schemes.join(" or "),
            raw
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty()); // Auto-generated
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_time_ms, 30_000);
        assert_eq!(config.connectivity.downgrade_after, 3);
        assert_eq!(config.cloud.push_topic, "config.updated");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));
        config.device.id = "register-1".into();

        config.cloud.push_url = Some("https://not-a-socket".into());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));
        config.cloud.push_url = Some("wss://push.example/socket".into());
        assert!(config.validate().is_ok());

        config.retry.jitter_factor = 1.5;
        assert!(config.validate().unwrap_err().is_config_error());
        config.retry.jitter_factor = 0.0;

        config.retry.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
        config.retry.base_delay_ms = 500;

        config.connectivity.downgrade_after = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [device]
            id = "register-7"

            [retry]
            max_attempts = 2

            [schema]
            collections = [{ key = "menuItems", entity_type = "menuItem" }]
            scalars = ["storeSettings"]
            "#,
        )
        .unwrap();

        assert_eq!(config.device.id, "register-7");
        assert_eq!(config.device.name, "POS Terminal");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert!(config.schema.knows_entity_type("menuItem"));
        assert!(!config.schema.knows_entity_type("category"));
    }

    #[test]
    fn test_toml_roundtrip_sections() {
        let config = SyncConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[cloud]"));
        assert!(toml_str.contains("[breaker]"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("haven-sync-test-{}", Uuid::new_v4()));
        let path = dir.join("sync.toml");

        let mut config = SyncConfig::default();
        config.device.name = "Bar Register".into();
        config.save(Some(path.clone())).unwrap();

        let loaded = SyncConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.device.name, "Bar Register");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_first_load_persists_device_id() {
        let dir = std::env::temp_dir().join(format!("haven-sync-test-{}", Uuid::new_v4()));
        let path = dir.join("sync.toml");

        let first = SyncConfig::load(Some(path.clone())).unwrap();
        assert!(path.exists());

        let second = SyncConfig::load(Some(path)).unwrap();
        assert_eq!(first.device.id, second.device.id);

        let _ = std::fs::remove_dir_all(dir);
    }
}

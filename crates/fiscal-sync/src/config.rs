//! # Agent Configuration
//!
//! Configuration management for the fiscal agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FISCAL_INBOX_DIR=/var/spool/invoices                               │
//! │     FISCAL_BACKEND_URL=https://fiscal.example.com/api                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fiscal-bridge/agent.toml (Linux)                         │
//! │     ~/Library/Application Support/com.fiscal.bridge/agent.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     simulated backend, ./inbox, 3 retries                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [agent]
//! name = "Front Desk"
//!
//! [watcher]
//! inbox_dir = "/var/spool/invoices"
//! debounce_ms = 500
//!
//! [backend]
//! kind = "http"
//! url = "https://fiscal.example.com/api/"
//! timeout_secs = 10
//!
//! [sync]
//! max_retries = 3
//! retry_delay_secs = 5
//!
//! [control]
//! port = 8787
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Agent Section
// =============================================================================

/// Identity of this agent instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Human-readable name shown in status output.
    #[serde(default = "default_agent_name")]
    pub name: String,
}

fn default_agent_name() -> String {
    "Fiscal Agent".to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        AgentSection {
            name: default_agent_name(),
        }
    }
}

// =============================================================================
// Watcher Settings
// =============================================================================

/// Inbox directory polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    /// Directory scanned for `*.json` invoice files.
    #[serde(default = "default_inbox_dir")]
    pub inbox_dir: PathBuf,

    /// Interval between directory scans (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// A file must keep the same size and mtime for this long (milliseconds).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Move ingested files out of the inbox.
    #[serde(default = "default_true")]
    pub archive_processed: bool,

    /// Archive directory, relative to the inbox unless absolute.
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,

    /// Start watching as soon as the agent starts.
    #[serde(default = "default_true")]
    pub autostart: bool,
}

fn default_inbox_dir() -> PathBuf {
    PathBuf::from("inbox")
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("processed")
}

impl Default for WatcherSettings {
    fn default() -> Self {
        WatcherSettings {
            inbox_dir: default_inbox_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            archive_processed: true,
            processed_dir: default_processed_dir(),
            autostart: true,
        }
    }
}

impl WatcherSettings {
    /// Resolved archive directory.
    pub fn processed_path(&self) -> PathBuf {
        if self.processed_dir.is_absolute() {
            self.processed_dir.clone()
        } else {
            self.inbox_dir.join(&self.processed_dir)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// =============================================================================
// Backend Settings
// =============================================================================

/// Which fiscal backend implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// JSON over HTTP.
    Http,

    /// In-process backend for demos and local testing.
    #[default]
    Simulated,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Http => write!(f, "http"),
            BackendKind::Simulated => write!(f, "simulated"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(BackendKind::Http),
            "simulated" | "sim" => Ok(BackendKind::Simulated),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown backend kind: '{}'. Valid options: http, simulated",
                other
            ))),
        }
    }
}

/// Fiscal backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub kind: BackendKind,

    /// Base URL of the HTTP backend. Required when `kind = "http"`.
    #[serde(default)]
    pub url: Option<String>,

    /// Upper bound for every backend call (seconds).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings {
            kind: BackendKind::default(),
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Retry and offline behavior of the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Transient failures tolerated per invoice before it is excluded.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries (seconds). Attempt `n` waits `n` times this.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// First offline probe ceiling (seconds).
    #[serde(default = "default_probe_base_secs")]
    pub probe_base_secs: u64,

    /// Maximum offline probe ceiling (seconds).
    #[serde(default = "default_probe_max_secs")]
    pub probe_max_secs: u64,

    /// Consecutive failed probes before an alert is raised.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u32,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_probe_base_secs() -> u64 {
    2
}
fn default_probe_max_secs() -> u64 {
    60
}
fn default_alert_threshold() -> u32 {
    5
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            probe_base_secs: default_probe_base_secs(),
            probe_max_secs: default_probe_max_secs(),
            alert_threshold: default_alert_threshold(),
        }
    }
}

// =============================================================================
// Remaining Sections
// =============================================================================

/// Activity log sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySettings {
    /// Entries kept in memory.
    #[serde(default = "default_activity_capacity")]
    pub capacity: usize,
}

fn default_activity_capacity() -> usize {
    50
}

impl Default for ActivitySettings {
    fn default() -> Self {
        ActivitySettings {
            capacity: default_activity_capacity(),
        }
    }
}

/// Database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `<data_dir>/fiscal-agent.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Control API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_control_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    8787
}

impl Default for ControlSettings {
    fn default() -> Self {
        ControlSettings {
            bind_addr: default_bind_addr(),
            port: default_control_port(),
        }
    }
}

impl ControlSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Main Agent Configuration
// =============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub watcher: WatcherSettings,

    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub activity: ActivitySettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub control: ControlSettings,
}

impl AgentConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
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

        info!(?path, "Agent config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.backend.kind == BackendKind::Http {
            let raw = self.backend.url.as_deref().ok_or_else(|| {
                SyncError::InvalidConfig("backend.url is required when backend.kind = \"http\"".into())
            })?;
            let url = Url::parse(raw)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "Backend URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
        }

        if self.backend.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "backend.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.watcher.poll_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "watcher.poll_interval_ms must be greater than 0".into(),
            ));
        }

        if self.watcher.inbox_dir.as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig("watcher.inbox_dir must be set".into()));
        }

        if self.sync.probe_base_secs == 0 || self.sync.probe_max_secs < self.sync.probe_base_secs {
            return Err(SyncError::InvalidConfig(
                "sync.probe_base_secs must be > 0 and <= sync.probe_max_secs".into(),
            ));
        }

        if self.activity.capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "activity.capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `FISCAL_*` overrides from `lookup`.
    ///
    /// `load` passes the process environment; tests pass a map.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("FISCAL_AGENT_NAME") {
            self.agent.name = name;
        }

        if let Some(dir) = lookup("FISCAL_INBOX_DIR") {
            debug!(inbox_dir = %dir, "Overriding inbox directory from environment");
            self.watcher.inbox_dir = PathBuf::from(dir);
        }

        if let Some(kind) = lookup("FISCAL_BACKEND_KIND") {
            match kind.parse() {
                Ok(parsed) => self.backend.kind = parsed,
                Err(_) => warn!(kind = %kind, "Unknown backend kind in environment"),
            }
        }

        if let Some(url) = lookup("FISCAL_BACKEND_URL") {
            debug!(url = %url, "Overriding backend URL from environment");
            self.backend.url = Some(url);
        }

        if let Some(secs) = lookup("FISCAL_BACKEND_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.backend.timeout_secs = s;
            }
        }

        if let Some(retries) = lookup("FISCAL_MAX_RETRIES") {
            if let Ok(r) = retries.parse::<u32>() {
                self.sync.max_retries = r;
            }
        }

        if let Some(path) = lookup("FISCAL_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(port) = lookup("FISCAL_CONTROL_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding control port from environment");
                self.control.port = p;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "fiscal", "bridge")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    /// Resolved database file path.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "fiscal", "bridge")
                .map(|dirs| dirs.data_dir().join("fiscal-agent.db"))
                .unwrap_or_else(|| PathBuf::from("fiscal-agent.db"))
        })
    }

    /// Engine timings derived from the `[sync]` and `[backend]` sections.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_retries: self.sync.max_retries,
            retry_delay: Duration::from_secs(self.sync.retry_delay_secs),
            probe_base: Duration::from_secs(self.sync.probe_base_secs),
            probe_max: Duration::from_secs(self.sync.probe_max_secs),
            alert_threshold: self.sync.alert_threshold,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }
}

// =============================================================================
// Engine Settings
// =============================================================================

/// Runtime timings used by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub probe_base: Duration,
    pub probe_max: Duration,
    pub alert_threshold: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        AgentConfig::default().engine_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.backend.kind, BackendKind::Simulated);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.watcher.debounce_ms, 500);
        assert_eq!(config.activity.capacity, 50);
        assert_eq!(config.control.bind_address(), "127.0.0.1:8787");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_reads_file_and_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[agent]\nname = \"Front Desk\"\n\n[sync]\nmax_retries = 5\n").unwrap();

        let config = AgentConfig::load(Some(path)).unwrap();
        assert_eq!(config.agent.name, "Front Desk");
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.retry_delay_secs, default_retry_delay_secs());

        let missing = AgentConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(missing.agent.name, "Fiscal Agent");
    }

    #[test]
    fn test_backend_url_validation() {
        let mut config = AgentConfig::default();
        config.backend.kind = BackendKind::Http;
        assert!(config.validate().unwrap_err().is_config_error());

        config.backend.url = Some("ftp://fiscal.example.com".to_string());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.backend.url = Some("not a url".to_string());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.backend.url = Some("https://fiscal.example.com/api/".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FISCAL_INBOX_DIR", "/tmp/in"),
            ("FISCAL_BACKEND_KIND", "http"),
            ("FISCAL_BACKEND_URL", "http://localhost:9000"),
            ("FISCAL_MAX_RETRIES", "7"),
            ("FISCAL_CONTROL_PORT", "not-a-port"),
        ]);

        let mut config = AgentConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.watcher.inbox_dir, PathBuf::from("/tmp/in"));
        assert_eq!(config.backend.kind, BackendKind::Http);
        assert_eq!(config.backend.url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.sync.max_retries, 7);
        // Unparseable values are ignored
        assert_eq!(config.control.port, 8787);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            [watcher]
            inbox_dir = "/srv/inbox"

            [sync]
            max_retries = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.watcher.inbox_dir, PathBuf::from("/srv/inbox"));
        assert_eq!(config.watcher.processed_path(), PathBuf::from("/srv/inbox/processed"));
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.retry_delay_secs, 5);
        assert_eq!(config.engine_settings().probe_max, Duration::from_secs(60));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.toml");

        let mut config = AgentConfig::default();
        config.agent.name = "Till 2".to_string();
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[watcher]"));
        let loaded: AgentConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.agent.name, "Till 2");
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("HTTP".parse::<BackendKind>().unwrap(), BackendKind::Http);
        assert_eq!("sim".parse::<BackendKind>().unwrap(), BackendKind::Simulated);
        assert!("grpc".parse::<BackendKind>().is_err());
    }
}

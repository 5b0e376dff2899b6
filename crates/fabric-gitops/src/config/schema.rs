use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::gitops::validation::PolicyConfig;

/// Top-level engine configuration. Every key has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Local root for per-fabric working trees.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub conflicts: ConflictConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fabric-gitops")
}

fn default_workspace_dir() -> PathBuf {
    data_root().join("workspaces")
}

fn default_database_path() -> PathBuf {
    data_root().join("state.db")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            database_path: default_database_path(),
            git: GitConfig::default(),
            watcher: WatcherConfig::default(),
            scheduler: SchedulerConfig::default(),
            conflicts: ConflictConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

/// Git host API settings and fallback credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Used when a binding carries no credentials of its own.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub token_env_var: Option<String>,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub commit_author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            token: None,
            token_file: None,
            token_env_var: None,
            default_branch: default_branch(),
            commit_author: None,
        }
    }
}

impl GitConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Raw directory watcher timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Files modified more recently than this are skipped (may be mid-write).
    #[serde(default = "default_debounce_delay_secs")]
    pub debounce_delay_secs: u64,
    /// Files older than this are skipped.
    #[serde(default = "default_max_file_age_secs")]
    pub max_file_age_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_debounce_delay_secs() -> u64 {
    2
}

fn default_max_file_age_secs() -> u64 {
    300
}

fn default_stop_timeout_secs() -> u64 {
    5
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            debounce_delay_secs: default_debounce_delay_secs(),
            max_file_age_secs: default_max_file_age_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl WatcherConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_secs(self.debounce_delay_secs)
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Master scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_max_concurrent_syncs")]
    pub max_concurrent_syncs: usize,
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_max_concurrent_syncs() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            max_concurrent_syncs: default_max_concurrent_syncs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictConfig {
    /// Timestamps closer than this are treated as simultaneous.
    #[serde(default = "default_clock_skew_tolerance_secs")]
    pub clock_skew_tolerance_secs: u64,
}

fn default_clock_skew_tolerance_secs() -> u64 {
    5
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            clock_skew_tolerance_secs: default_clock_skew_tolerance_secs(),
        }
    }
}

impl ConflictConfig {
    pub fn clock_skew_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_skew_tolerance_secs as i64)
    }
}

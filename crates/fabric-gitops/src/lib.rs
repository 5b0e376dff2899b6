pub mod config;
pub mod db;
pub mod error;
pub mod gitops;
pub mod ingest;
pub mod logging;
pub mod secrets;

pub use config::{load_config, load_config_from_str, EngineConfig};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, FabricGitOpsError, Result};
pub use gitops::{
    ConflictStrategy, GitOpsError, GitOpsService, GitProvider, Manifest, ResourceKind,
    SyncDirectionParam, SyncResult, WatcherManager,
};
pub use ingest::{IngestError, IngestionResult, Ingestor};
pub use logging::{init_tracing, LogFormat};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError, TokenEncryptor};

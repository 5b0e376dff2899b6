use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FabricGitOpsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("GitOps error: {0}")]
    GitOps(#[from] crate::gitops::GitOpsError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] crate::ingest::IngestError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FabricGitOpsError>;

//! Raw manifest ingestion.
//!
//! Files dropped into `raw/` (or staged into `raw/pending/` by a pull) go
//! through discovery, validation, classification, processing and archiving.
//! A file that fails any stage is moved to `raw/errors/` with a JSON
//! sidecar; successful files are moved to `raw/processed/`. Source files are
//! never deleted.

mod archive;
mod context;
mod runner;
mod summary;

use std::path::PathBuf;

use thiserror::Error;

pub use context::RemoteOrigin;
pub use runner::Ingestor;
pub(crate) use runner::stage_remote_file;
pub use summary::{FileOutcome, FileStage, IngestionResult, StageSummary};

use crate::db::DatabaseError;
use crate::gitops::GitOpsError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to scan {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to archive {from} to {to}: {source}")]
    Archive {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free archive name for {0}")]
    ArchiveNameExhausted(PathBuf),

    #[error("Not a file in the raw intake directory: {0}")]
    NotRawFile(PathBuf),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    GitOps(#[from] GitOpsError),
}

//! GitOps synchronisation core for network fabrics.
//!
//! This module keeps fabric resources in sync between the record store,
//! a Git repository of YAML manifests and a live cluster:
//! - Manifest codec and policy engine
//! - Directory layout of a fabric inside the repository
//! - Git host client with optimistic concurrency
//! - Conflict detection and resolution
//! - Bidirectional sync orchestration, raw directory watching and scheduling

pub mod audit;
pub mod codec;
pub mod conflict;
pub mod error;
pub mod fabric_sync;
pub mod git;
pub mod layout;
pub mod model;
pub mod orchestrator;
pub mod resource;
pub mod service;
pub mod sync_scheduler;
pub mod validation;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use conflict::{ConflictDetector, ConflictInfo, ConflictService, ConflictStrategy, ConflictType};
pub use error::{ErrorKind, GitOpsError, Result};
pub use fabric_sync::{ApplyStatus, ClusterApi, ClusterInfo, FabricSyncResult, FabricSyncTask};
pub use git::types::{CommitDiff, RemoteFile, RepoRef, WriteResult};
pub use git::{GitHubClient, GitProvider, GitProviderFactory, ProviderResolver};
pub use layout::{resource_path, DirectoryLayout, InitializeResult};
pub use model::{
    ConflictStatus, DriftStatus, Fabric, GitRepositoryBinding, OperationStatus, OperationType,
    ResourceRecord, SyncDirection, SyncOperation,
};
pub use orchestrator::{
    ExternalChanges, FabricLocks, ResolveSummary, SyncDirectionParam, SyncResult, SyncService,
    SyncStats,
};
pub use resource::{Manifest, ObjectMeta, ResourceKind};
pub use service::{GitOpsService, GitOpsStatus, IngestionStatus, ResourceChangeEvent};
pub use sync_scheduler::{SchedulerRun, SyncScheduler};
pub use validation::{PolicyConfig, PolicyEngine, PolicyViolation, Severity, ViolationType};
pub use watcher::{
    RawDirectoryWatcher, RawIngestor, TickOutcome, WatcherManager, WatcherStats, WatcherStatus,
};

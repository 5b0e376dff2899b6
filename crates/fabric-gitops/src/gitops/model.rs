//! Managed records: resources, fabrics, repository bindings and sync audit entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::resource::{Manifest, ObjectMeta, ResourceKind, DEFAULT_NAMESPACE};
use super::validation::PolicyViolation;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum stored as text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("invalid {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

/// Which side(s) a resource is synchronised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    GuiToGit,
    GitToGui,
    #[default]
    Bidirectional,
}

text_enum!(SyncDirection {
    GuiToGit => "gui_to_git",
    GitToGui => "git_to_gui",
    Bidirectional => "bidirectional",
});

impl SyncDirection {
    /// Whether GUI-side edits of this resource are pushed to Git.
    pub fn pushes_to_git(&self) -> bool {
        matches!(self, SyncDirection::GuiToGit | SyncDirection::Bidirectional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    None,
    Detected,
    Resolved,
}

text_enum!(ConflictStatus {
    None => "none",
    Detected => "detected",
    Resolved => "resolved",
});

/// Relationship between desired (Git) and actual (cluster) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    #[default]
    InSync,
    SpecDrift,
    DesiredOnly,
    ActualOnly,
    CreationPending,
    DeletionPending,
}

text_enum!(DriftStatus {
    InSync => "in_sync",
    SpecDrift => "spec_drift",
    DesiredOnly => "desired_only",
    ActualOnly => "actual_only",
    CreationPending => "creation_pending",
    DeletionPending => "deletion_pending",
});

impl DriftStatus {
    /// Derives the drift between a desired and an actual spec.
    pub fn compute(
        desired: Option<&serde_json::Value>,
        actual: Option<&serde_json::Value>,
    ) -> DriftStatus {
        match (desired, actual) {
            (Some(d), Some(a)) if d == a => DriftStatus::InSync,
            (Some(_), Some(_)) => DriftStatus::SpecDrift,
            (Some(_), None) => DriftStatus::DesiredOnly,
            (None, Some(_)) => DriftStatus::ActualOnly,
            (None, None) => DriftStatus::InSync,
        }
    }

    /// Whether the cluster still has to be brought to the desired state.
    pub fn needs_apply(&self) -> bool {
        !matches!(self, DriftStatus::InSync | DriftStatus::ActualOnly)
    }
}

/// Lifecycle of a record. Blocking policy violations keep a record `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    #[default]
    Pending,
    Active,
    Error,
}

text_enum!(ResourceState {
    Pending => "pending",
    Active => "active",
    Error => "error",
});

/// One externally detected change, appended to a resource's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalModification {
    pub detected_at: DateTime<Utc>,
    /// Where the change was observed (`github`, `cluster`).
    pub source: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_sha: Option<String>,
}

/// A managed fabric resource as held by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: i64,
    pub fabric_id: i64,
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub api_version: String,
    /// GUI-visible spec.
    pub spec: serde_json::Value,
    /// Spec last read from Git or a raw file.
    pub desired_spec: Option<serde_json::Value>,
    /// Spec last read from the cluster.
    pub actual_spec: Option<serde_json::Value>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub managed_file_path: Option<String>,
    pub desired_file_path: Option<String>,
    pub file_hash: Option<String>,
    /// Git blob SHA of the managed file as last seen by the orchestrator.
    pub remote_sha: Option<String>,
    pub last_file_sync: Option<DateTime<Utc>>,
    /// Last GUI-side modification.
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub sync_direction: SyncDirection,
    pub conflict_status: ConflictStatus,
    pub conflict_details: Option<serde_json::Value>,
    pub external_modifications: Vec<ExternalModification>,
    pub drift_status: DriftStatus,
    pub state: ResourceState,
    pub policy_violations: Vec<PolicyViolation>,
}

impl ResourceRecord {
    /// Renders the GUI-visible state as a manifest.
    pub fn to_manifest(&self) -> Manifest {
        let namespace = if self.namespace.is_empty() || self.namespace == DEFAULT_NAMESPACE {
            None
        } else {
            Some(self.namespace.clone())
        };
        Manifest {
            api_version: self.api_version.clone(),
            kind: self.kind.as_str().to_string(),
            metadata: ObjectMeta {
                name: self.name.clone(),
                namespace,
                labels: self.labels.clone(),
                annotations: self.annotations.clone(),
            },
            spec: self.spec.clone(),
        }
    }

    /// `kind/namespace/name`, used in logs and error lists.
    pub fn identity(&self) -> String {
        format!("{}/{}/{}", self.kind, self.namespace, self.name)
    }

    /// Whether the GUI side changed after the last file sync watermark.
    pub fn modified_since_sync(&self) -> bool {
        match self.last_file_sync {
            Some(synced) => self.last_updated > synced,
            None => false,
        }
    }
}

/// Field values written by an upsert.
#[derive(Debug, Clone, Default)]
pub struct ResourceFields {
    pub api_version: String,
    pub spec: serde_json::Value,
    pub desired_spec: Option<serde_json::Value>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub managed_file_path: Option<String>,
    pub desired_file_path: Option<String>,
    pub file_hash: Option<String>,
    /// Kept as stored when `None`.
    pub remote_sha: Option<String>,
    pub last_file_sync: Option<DateTime<Utc>>,
    /// Defaults to the time of the write.
    pub last_updated: Option<DateTime<Utc>>,
    /// Only used when the record is created or gets its first managed file.
    pub sync_direction: SyncDirection,
    pub state: ResourceState,
    pub policy_violations: Vec<PolicyViolation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FabricDriftStatus {
    #[default]
    InSync,
    DriftDetected,
    Unknown,
}

text_enum!(FabricDriftStatus {
    InSync => "in_sync",
    DriftDetected => "drift_detected",
    Unknown => "unknown",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    #[default]
    NotStarted,
    StructureInitialized,
    Ingested,
}

text_enum!(OnboardingStatus {
    NotStarted => "not_started",
    StructureInitialized => "structure_initialized",
    Ingested => "ingested",
});

/// Top-level tenant owning a set of resources and one repository binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fabric {
    pub id: i64,
    pub name: String,
    /// Root path of the GitOps layout inside the repository (may be empty).
    pub gitops_directory: String,
    pub gitops_initialized: bool,
    /// Weak reference to the repository binding.
    pub git_repository_id: Option<i64>,
    pub desired_state_commit: Option<String>,
    pub drift_count: i64,
    pub drift_status: FabricDriftStatus,
    pub last_directory_sync: Option<DateTime<Utc>>,
    pub onboarding_status: OnboardingStatus,
}

impl Fabric {
    /// Joins a layout-relative path onto the fabric's root inside the repository.
    pub fn repo_path(&self, relative: &str) -> String {
        let root = self.gitops_directory.trim_matches('/');
        if root.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", root, relative)
        }
    }

    /// Strips the fabric root from a repository path, if it is under it.
    pub fn relative_path<'a>(&self, repo_path: &'a str) -> Option<&'a str> {
        let root = self.gitops_directory.trim_matches('/');
        if root.is_empty() {
            return Some(repo_path);
        }
        repo_path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Connected,
    Failed,
}

text_enum!(ConnectionStatus {
    Unknown => "unknown",
    Connected => "connected",
    Failed => "failed",
});

/// Connection and credential binding to a remote Git host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitRepositoryBinding {
    pub id: i64,
    pub url: String,
    pub default_branch: String,
    pub push_branch: Option<String>,
    /// Hex AES-256-GCM ciphertext, see [`crate::secrets::TokenEncryptor`].
    pub encrypted_credentials: Option<String>,
    pub direct_push_enabled: bool,
    pub connection_status: ConnectionStatus,
}

impl GitRepositoryBinding {
    /// The branch pushes go to.
    pub fn effective_branch(&self) -> &str {
        match self.push_branch.as_deref() {
            Some(b) if !b.is_empty() => b,
            _ => &self.default_branch,
        }
    }

    /// Checks that direct pushes are allowed: connected and credentialed.
    pub fn check_push_allowed(&self) -> Result<(), String> {
        if !self.direct_push_enabled {
            return Err(format!("direct push is disabled for {}", self.url));
        }
        if self.connection_status != ConnectionStatus::Connected {
            return Err(format!(
                "repository {} is not connected (status: {})",
                self.url, self.connection_status
            ));
        }
        if self
            .encrypted_credentials
            .as_deref()
            .map_or(true, str::is_empty)
        {
            return Err(format!("repository {} has no credentials", self.url));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    GuiToGithub,
    GithubToGui,
    Bidirectional,
    DirectoryInit,
    ConflictResolution,
    Ingestion,
}

text_enum!(OperationType {
    GuiToGithub => "gui_to_github",
    GithubToGui => "github_to_gui",
    Bidirectional => "bidirectional",
    DirectoryInit => "directory_init",
    ConflictResolution => "conflict_resolution",
    Ingestion => "ingestion",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(OperationStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

/// Counters carried by a sync audit entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounters {
    pub files_processed: u32,
    pub files_created: u32,
    pub files_updated: u32,
    pub files_deleted: u32,
    pub conflicts_detected: u32,
}

/// Audit record of one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    pub fabric_id: i64,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub counters: OperationCounters,
    pub commit_sha: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Creates a new operation in `pending` state.
    pub fn new(fabric_id: i64, operation_type: OperationType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fabric_id,
            operation_type,
            status: OperationStatus::Pending,
            counters: OperationCounters::default(),
            commit_sha: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Transitions `pending -> in_progress`.
    pub fn start(&mut self) {
        if self.status == OperationStatus::Pending {
            self.status = OperationStatus::InProgress;
            self.started_at = Some(Utc::now());
        }
    }

    /// Sets the terminal status. Returns false if a terminal status was already set.
    pub fn finish(&mut self, status: OperationStatus, error_message: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
        true
    }
}

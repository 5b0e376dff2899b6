//! Directory layout of a fabric, locally and inside the repository.
//!
//! ```text
//! <gitops_root>/
//!   raw/{pending,processed,errors}/
//!   managed/<kind-plural>/<name>.yaml | <namespace>-<name>.yaml
//!   unmanaged/
//! ```

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::audit;
use super::error::{GitOpsError, Result};
use super::git::GitProvider;
use super::model::{Fabric, OperationCounters, OperationStatus, OperationType};
use super::resource::{ResourceKind, DEFAULT_NAMESPACE};
use crate::db::{fabric_repo, Database};

pub const RAW_DIR: &str = "raw";
pub const PENDING_DIR: &str = "pending";
pub const PROCESSED_DIR: &str = "processed";
pub const ERRORS_DIR: &str = "errors";
pub const MANAGED_DIR: &str = "managed";
pub const UNMANAGED_DIR: &str = "unmanaged";
pub const GITKEEP: &str = ".gitkeep";

/// Canonical layout-relative path of a resource's managed file.
///
/// The namespace is folded into the file name only when it is not the default.
pub fn resource_path(kind: ResourceKind, namespace: &str, name: &str) -> String {
    let file = if namespace.is_empty() || namespace == DEFAULT_NAMESPACE {
        format!("{}.yaml", name)
    } else {
        format!("{}-{}.yaml", namespace, name)
    };
    format!("{}/{}/{}", MANAGED_DIR, kind.directory(), file)
}

/// The kind whose managed directory is `directory`.
pub fn kind_for_directory(directory: &str) -> Option<ResourceKind> {
    ResourceKind::all()
        .iter()
        .copied()
        .find(|k| k.directory() == directory)
}

/// Whether the path names a YAML file.
pub fn is_manifest_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml")
}

/// Leaf directories of the layout, layout-relative. Each holds a `.gitkeep` remotely.
pub fn leaf_directories() -> Vec<String> {
    let mut dirs = vec![
        format!("{}/{}", RAW_DIR, PENDING_DIR),
        format!("{}/{}", RAW_DIR, PROCESSED_DIR),
        format!("{}/{}", RAW_DIR, ERRORS_DIR),
    ];
    dirs.extend(
        ResourceKind::all()
            .iter()
            .map(|k| format!("{}/{}", MANAGED_DIR, k.directory())),
    );
    dirs.push(UNMANAGED_DIR.to_string());
    dirs
}

fn check_relative(relative: &str) -> Result<&Path> {
    let path = Path::new(relative);
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(GitOpsError::PathTraversal(relative.to_string()));
    }
    Ok(path)
}

/// A fabric's local working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    root: PathBuf,
}

impl DirectoryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<workspace>/fabric-<id>/<gitops_directory>`.
    pub fn for_fabric(workspace_dir: &Path, fabric: &Fabric) -> Result<Self> {
        let subdir = check_relative(fabric.gitops_directory.trim_matches('/'))?;
        Ok(Self::new(
            workspace_dir
                .join(format!("fabric-{}", fabric.id))
                .join(subdir),
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join(RAW_DIR)
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.raw_dir().join(PENDING_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.raw_dir().join(PROCESSED_DIR)
    }

    pub fn errors_dir(&self) -> PathBuf {
        self.raw_dir().join(ERRORS_DIR)
    }

    pub fn managed_dir(&self) -> PathBuf {
        self.root.join(MANAGED_DIR)
    }

    pub fn unmanaged_dir(&self) -> PathBuf {
        self.root.join(UNMANAGED_DIR)
    }

    /// Resolves a layout-relative path, refusing anything that leaves the root.
    pub fn local_path(&self, relative: &str) -> Result<PathBuf> {
        Ok(self.root.join(check_relative(relative)?))
    }

    /// Layout-relative form of a path under the root, with `/` separators.
    pub fn relative_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Creates every layout directory that is missing. Returns the ones created.
    pub fn ensure_local(&self) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for dir in leaf_directories() {
            let path = self.local_path(&dir)?;
            if !path.is_dir() {
                std::fs::create_dir_all(&path).map_err(|e| GitOpsError::io(&path, e))?;
                created.push(dir);
            }
        }
        Ok(created)
    }

    /// Writes a managed file, creating its directory.
    pub fn write_managed(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self.local_path(relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GitOpsError::io(parent, e))?;
        }
        std::fs::write(&path, content).map_err(|e| GitOpsError::io(&path, e))?;
        Ok(path)
    }

    /// Removes a managed file if present. Returns whether it existed.
    pub fn remove_managed(&self, relative: &str) -> Result<bool> {
        let path = self.local_path(relative)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GitOpsError::io(&path, e)),
        }
    }
}

/// Outcome of [`initialize`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub success: bool,
    pub already_initialized: bool,
    pub created_directories: Vec<String>,
    /// Repository paths of the `.gitkeep` files created remotely.
    pub remote_files_created: Vec<String>,
    pub message: String,
    pub errors: Vec<String>,
}

/// Creates the layout locally and, when a provider is given, in the repository.
///
/// Without `force` this is a no-op for a fabric already marked initialized.
/// The fabric is marked initialized only when every directory exists.
pub async fn initialize(
    db: &Database,
    fabric_id: i64,
    layout: &DirectoryLayout,
    provider: Option<&dyn GitProvider>,
    force: bool,
) -> Result<InitializeResult> {
    let fabric = fabric_repo::require(db, fabric_id)?;
    if fabric.gitops_initialized && !force {
        return Ok(InitializeResult {
            success: true,
            already_initialized: true,
            message: format!("Fabric '{}' is already initialized", fabric.name),
            ..Default::default()
        });
    }

    let mut op = audit::begin(db, fabric_id, OperationType::DirectoryInit);
    let mut result = InitializeResult::default();

    match layout.ensure_local() {
        Ok(created) => result.created_directories = created,
        Err(e) => result.errors.push(e.to_string()),
    }

    if let Some(provider) = provider {
        let message = format!("Initialize GitOps directory structure for fabric {}", fabric.name);
        for dir in leaf_directories() {
            let path = fabric.repo_path(&format!("{}/{}", dir, GITKEEP));
            match provider.get_file(&path).await {
                Ok(Some(_)) => {}
                Ok(None) => match provider.create_file(&path, "", &message).await {
                    Ok(_) | Err(GitOpsError::AlreadyExists(_)) => {
                        result.remote_files_created.push(path)
                    }
                    Err(e) => result.errors.push(format!("{}: {}", path, e)),
                },
                Err(e) => result.errors.push(format!("{}: {}", path, e)),
            }
        }
    }

    let counters = OperationCounters {
        files_processed: leaf_directories().len() as u32,
        files_created: result.remote_files_created.len() as u32,
        ..Default::default()
    };

    if result.errors.is_empty() {
        fabric_repo::mark_initialized(db, fabric_id, Utc::now())?;
        result.success = true;
        result.message = format!(
            "Initialized fabric '{}': {} local directories, {} remote files created",
            fabric.name,
            result.created_directories.len(),
            result.remote_files_created.len()
        );
        info!(fabric_id, "{}", result.message);
        audit::finish(db, &mut op, OperationStatus::Completed, counters, None, None);
    } else {
        result.message = format!(
            "Initialization of fabric '{}' incomplete: {} errors",
            fabric.name,
            result.errors.len()
        );
        warn!(fabric_id, "{}", result.message);
        let first = result.errors.first().cloned();
        audit::finish(db, &mut op, OperationStatus::Failed, counters, None, first);
    }

    Ok(result)
}

//! Test harness for isolated end-to-end runs.
//!
//! The `TestHarness` struct provides:
//! - A temporary workspace directory and an in-memory record store
//! - One fabric bound to a `FakeGitProvider`, initialized locally and remotely
//! - A `GitOpsService` wired to both

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use fabric_gitops::config::EngineConfig;
use fabric_gitops::db::fabric_repo::{self, NewFabric};
use fabric_gitops::db::repository_repo::{self, NewGitRepository};
use fabric_gitops::db::resource_repo;
use fabric_gitops::gitops::model::ConnectionStatus;
use fabric_gitops::gitops::{
    ConflictStrategy, DirectoryLayout, Fabric, GitOpsService, GitProvider, ProviderResolver,
    ResourceKind, ResourceRecord, SyncDirectionParam, SyncResult,
};
use fabric_gitops::Database;

use super::fake_git::FakeGitProvider;

/// Root of the fabric inside the repository.
pub const FABRIC_DIR: &str = "fabrics/lab";

/// Hands out the same fake for every bound fabric.
struct StaticResolver(Arc<FakeGitProvider>);

impl ProviderResolver for StaticResolver {
    fn resolve(
        &self,
        fabric: &Fabric,
    ) -> fabric_gitops::gitops::Result<Option<Arc<dyn GitProvider>>> {
        Ok(fabric
            .git_repository_id
            .map(|_| Arc::clone(&self.0) as Arc<dyn GitProvider>))
    }
}

pub struct TestHarness {
    workspace: TempDir,
    pub db: Database,
    pub git: Arc<FakeGitProvider>,
    pub service: GitOpsService,
    pub fabric_id: i64,
    pub repository_id: i64,
    pub layout: DirectoryLayout,
}

impl TestHarness {
    /// Creates the harness and initializes the fabric's layout.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Like [`TestHarness::new`], with a chance to adjust the engine config.
    pub async fn with_config(adjust: impl FnOnce(&mut EngineConfig)) -> Self {
        let workspace = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_in_memory().expect("Failed to open record store");
        let git = Arc::new(FakeGitProvider::new());

        let mut config = EngineConfig {
            workspace_dir: workspace.path().join("workspaces"),
            database_path: workspace.path().join("state.db"),
            ..Default::default()
        };
        adjust(&mut config);

        let repository = repository_repo::insert(
            &db,
            &NewGitRepository {
                url: "https://github.com/acme/fabric-config".into(),
                default_branch: "main".into(),
                push_branch: None,
                encrypted_credentials: Some("sealed-token".into()),
                direct_push_enabled: true,
                connection_status: ConnectionStatus::Connected,
            },
        )
        .expect("Failed to insert repository binding");
        let fabric = fabric_repo::insert(
            &db,
            &NewFabric {
                name: "lab".into(),
                gitops_directory: FABRIC_DIR.into(),
                git_repository_id: Some(repository.id),
            },
        )
        .expect("Failed to insert fabric");

        let service = GitOpsService::new(
            db.clone(),
            config.clone(),
            Arc::new(StaticResolver(Arc::clone(&git))),
        )
        .expect("Failed to build service");
        let layout = DirectoryLayout::for_fabric(&config.workspace_dir, &fabric)
            .expect("Failed to resolve layout");

        let init = service.initialize(fabric.id, false).await;
        assert!(init.success, "initialization failed: {:?}", init.errors);

        Self {
            workspace,
            db,
            git,
            service,
            fabric_id: fabric.id,
            repository_id: repository.id,
            layout,
        }
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    /// Writes a file directly into `raw/`.
    pub fn write_raw(&self, filename: &str, content: &str) -> PathBuf {
        let path = self.layout.raw_dir().join(filename);
        std::fs::write(&path, content).expect("Failed to write raw file");
        path
    }

    /// Writes a file into `raw/pending/`.
    pub fn write_pending(&self, filename: &str, content: &str) -> PathBuf {
        let path = self.layout.pending_dir().join(filename);
        std::fs::write(&path, content).expect("Failed to write pending file");
        path
    }

    /// Repository path of a layout-relative path.
    pub fn repo_path(&self, relative: &str) -> String {
        format!("{}/{}", FABRIC_DIR, relative)
    }

    pub fn fabric(&self) -> Fabric {
        fabric_repo::require(&self.db, self.fabric_id).expect("fabric exists")
    }

    pub fn record(&self, kind: ResourceKind, name: &str) -> Option<ResourceRecord> {
        resource_repo::find(&self.db, self.fabric_id, kind, "default", name)
            .expect("Failed to query resource")
    }

    pub fn vpc(&self, name: &str) -> ResourceRecord {
        self.record(ResourceKind::Vpc, name)
            .unwrap_or_else(|| panic!("VPC {} not found", name))
    }

    /// Sorted file names directly in `dir`.
    pub fn files_in(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().is_file())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Runs a sync that leaves conflicts for a person to resolve.
    pub async fn sync(&self, direction: SyncDirectionParam, force: bool) -> SyncResult {
        self.service
            .sync(self.fabric_id, direction, force, ConflictStrategy::UserGuided)
            .await
    }
}

use chrono::Utc;
use serde_json::json;

use super::model::{
    ConflictStatus, DriftStatus, ResourceRecord, ResourceState, SyncDirection,
};
use super::resource::{ResourceKind, DEFAULT_NAMESPACE, VPC_API_VERSION};

/// An in-memory VPC record for pure tests.
pub(crate) fn sample_record() -> ResourceRecord {
    let now = Utc::now();
    ResourceRecord {
        id: 1,
        fabric_id: 1,
        kind: ResourceKind::Vpc,
        namespace: DEFAULT_NAMESPACE.to_string(),
        name: "prod-vpc".to_string(),
        api_version: VPC_API_VERSION.to_string(),
        spec: json!({"subnets": {}}),
        desired_spec: None,
        actual_spec: None,
        labels: Default::default(),
        annotations: Default::default(),
        managed_file_path: None,
        desired_file_path: None,
        file_hash: None,
        remote_sha: None,
        last_file_sync: None,
        last_updated: now,
        created_at: now,
        sync_direction: SyncDirection::Bidirectional,
        conflict_status: ConflictStatus::None,
        conflict_details: None,
        external_modifications: Vec::new(),
        drift_status: DriftStatus::InSync,
        state: ResourceState::Active,
        policy_violations: Vec::new(),
    }
}

/// Resolves every fabric to "no binding".
pub(crate) struct NoProviders;

impl super::git::ProviderResolver for NoProviders {
    fn resolve(
        &self,
        _fabric: &super::model::Fabric,
    ) -> super::error::Result<Option<std::sync::Arc<dyn super::git::GitProvider>>> {
        Ok(None)
    }
}

/// A sync service over `db` with default policies and no repository access.
pub(crate) fn local_sync_service(
    db: &crate::db::Database,
    workspace: &std::path::Path,
) -> super::orchestrator::SyncService {
    use std::sync::Arc;

    let policy = Arc::new(
        super::validation::PolicyEngine::new(super::validation::PolicyConfig::default()).unwrap(),
    );
    super::orchestrator::SyncService::new(
        db.clone(),
        workspace.to_path_buf(),
        Arc::new(NoProviders),
        Arc::new(crate::ingest::Ingestor::new(db.clone(), policy)),
        super::conflict::ConflictService::new(db.clone(), chrono::Duration::seconds(5)),
        super::orchestrator::FabricLocks::new(),
    )
}

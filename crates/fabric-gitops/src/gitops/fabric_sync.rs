//! Reconciliation between the record store and a fabric's live cluster.
//!
//! [`FabricSyncTask::sync_from_cluster`] reads every supported kind from the
//! cluster, stores what it finds as `actual_spec` and recomputes drift.
//! Objects with no record are adopted as `actual_only` records.
//! [`FabricSyncTask::apply_pending`] pushes desired state to the cluster for
//! records whose drift says the cluster is behind.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use super::error::{GitOpsError, Result};
use super::model::{
    ConflictStatus, DriftStatus, FabricDriftStatus, ResourceFields, ResourceRecord, ResourceState,
    SyncDirection,
};
use super::resource::{Manifest, ResourceKind};
use crate::db::resource_repo::{self, ResourceFilter};
use crate::db::{fabric_repo, Database};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub endpoint: String,
    pub server_version: String,
}

/// Result reported by the cluster for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Created,
    Configured,
    Unchanged,
    Deleted,
    NotFound,
}

/// Kubernetes-like cluster client.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Manifest>>;

    async fn apply(&self, manifest: &Manifest) -> Result<ApplyStatus>;

    async fn delete(&self, manifest: &Manifest) -> Result<ApplyStatus>;

    async fn test_connection(&self) -> Result<ClusterInfo>;
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FabricSyncResult {
    pub success: bool,
    pub message: String,
    /// Objects listed from the cluster.
    pub cluster_objects: usize,
    /// Records whose actual state was refreshed.
    pub refreshed: usize,
    /// Cluster objects that had no record and were adopted, as `kind/namespace/name`.
    pub actual_only: Vec<String>,
    pub applied: usize,
    pub deleted: usize,
    pub drift_count: usize,
    pub errors: Vec<String>,
}

impl FabricSyncResult {
    fn finish(&mut self, summary: String) {
        self.success = self.errors.is_empty();
        self.message = if self.success {
            summary
        } else {
            format!("{} ({} errors)", summary, self.errors.len())
        };
    }
}

type Key = (ResourceKind, String, String);

fn key_of(record: &ResourceRecord) -> Key {
    (record.kind, record.namespace.clone(), record.name.clone())
}

/// The manifest the cluster should converge to.
fn desired_manifest(record: &ResourceRecord) -> Manifest {
    let mut manifest = record.to_manifest();
    if let Some(desired) = &record.desired_spec {
        manifest.spec = desired.clone();
    }
    manifest
}

/// Drives one fabric's cluster reconciliation.
pub struct FabricSyncTask {
    db: Database,
    cluster: Arc<dyn ClusterApi>,
}

impl FabricSyncTask {
    pub fn new(db: Database, cluster: Arc<dyn ClusterApi>) -> Self {
        Self { db, cluster }
    }

    pub async fn test_connection(&self) -> Result<ClusterInfo> {
        let info = self.cluster.test_connection().await?;
        info!(
            endpoint = %info.endpoint,
            version = %info.server_version,
            "Cluster connection ok"
        );
        Ok(info)
    }

    /// Marks a record for removal from the cluster on the next apply.
    pub fn request_deletion(&self, resource_id: i64) -> Result<()> {
        resource_repo::set_drift_status(&self.db, resource_id, DriftStatus::DeletionPending)?;
        Ok(())
    }

    /// Refreshes `actual_spec` of every record from the cluster.
    ///
    /// A kind that cannot be listed is reported and its records are left
    /// untouched; the fabric drift status is then `unknown`.
    pub async fn sync_from_cluster(&self, fabric_id: i64) -> Result<FabricSyncResult> {
        let span = info_span!("fabric_sync", fabric_id, phase = "read");
        async move {
            let records = resource_repo::list(&self.db, fabric_id, &ResourceFilter::default())?;
            let mut by_key: HashMap<Key, ResourceRecord> =
                records.into_iter().map(|r| (key_of(&r), r)).collect();
            let mut result = FabricSyncResult::default();
            let mut incomplete = false;

            for &kind in ResourceKind::all() {
                let objects = match self.cluster.list(kind).await {
                    Ok(objects) => objects,
                    Err(e) => {
                        warn!("Listing {} failed: {}", kind, e);
                        result.errors.push(format!("list {}: {}", kind, e));
                        incomplete = true;
                        continue;
                    }
                };
                result.cluster_objects += objects.len();

                let mut seen = BTreeSet::new();
                for object in objects {
                    let key = (
                        kind,
                        object.metadata.namespace_or_default().to_string(),
                        object.metadata.name.clone(),
                    );
                    match by_key.get(&key) {
                        Some(record) => {
                            self.refresh(record, Some(&object.spec), &mut result);
                            seen.insert(key);
                        }
                        None => self.adopt(fabric_id, kind, &object, &mut result),
                    }
                }

                for (key, record) in by_key.iter().filter(|(k, _)| k.0 == kind) {
                    if !seen.contains(key) {
                        self.refresh(record, None, &mut result);
                    }
                }
                by_key.retain(|k, _| k.0 != kind);
            }

            let drift = self.record_fabric_drift(fabric_id, incomplete)?;
            result.drift_count = drift;
            result.finish(format!(
                "Read {} cluster objects, {} drifted",
                result.cluster_objects, drift
            ));
            info!(
                objects = result.cluster_objects,
                drift_count = drift,
                "Cluster state refreshed"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Creates an `actual_only` record for a cluster object.
    ///
    /// Adopted records have no desired state and are not pushed to Git
    /// until they get a managed file.
    fn adopt(
        &self,
        fabric_id: i64,
        kind: ResourceKind,
        object: &Manifest,
        result: &mut FabricSyncResult,
    ) {
        let namespace = object.metadata.namespace_or_default();
        let identity = format!("{}/{}/{}", kind, namespace, object.metadata.name);
        let fields = ResourceFields {
            api_version: if object.api_version.is_empty() {
                kind.default_api_version().to_string()
            } else {
                object.api_version.clone()
            },
            spec: object.spec.clone(),
            desired_spec: None,
            labels: object.metadata.labels.clone(),
            annotations: object.metadata.annotations.clone(),
            sync_direction: SyncDirection::GitToGui,
            state: ResourceState::Active,
            ..Default::default()
        };
        let adopted = resource_repo::upsert(
            &self.db,
            fabric_id,
            kind,
            namespace,
            &object.metadata.name,
            &fields,
        )
        .and_then(|(record, _)| {
            resource_repo::update_actual(&self.db, record.id, Some(&object.spec))
        });
        match adopted {
            Ok(record) => {
                debug!(resource = %record.identity(), "Adopted cluster object");
                result.actual_only.push(identity);
            }
            Err(e) => result.errors.push(format!("{}: {}", identity, e)),
        }
    }

    /// Stores an actual spec when it or the derived drift changed.
    fn refresh(
        &self,
        record: &ResourceRecord,
        actual: Option<&serde_json::Value>,
        result: &mut FabricSyncResult,
    ) {
        // A pending deletion stays pending until apply removes the record.
        if record.drift_status == DriftStatus::DeletionPending && actual.is_none() {
            return;
        }
        if record.actual_spec.as_ref() == actual
            && record.drift_status == DriftStatus::compute(record.desired_spec.as_ref(), actual)
        {
            return;
        }
        match resource_repo::update_actual(&self.db, record.id, actual) {
            Ok(updated) => {
                debug!(
                    resource = %updated.identity(),
                    drift = updated.drift_status.as_str(),
                    "Actual state refreshed"
                );
                result.refreshed += 1;
            }
            Err(e) => result.errors.push(format!("{}: {}", record.identity(), e)),
        }
    }

    /// Applies desired state for every record the cluster is behind on.
    ///
    /// Records with an open conflict or a blocking policy violation are
    /// left alone.
    pub async fn apply_pending(&self, fabric_id: i64) -> Result<FabricSyncResult> {
        let span = info_span!("fabric_sync", fabric_id, phase = "apply");
        async move {
            let records = resource_repo::list(&self.db, fabric_id, &ResourceFilter::default())?;
            let mut result = FabricSyncResult::default();

            for record in records.iter().filter(|r| r.drift_status.needs_apply()) {
                if record.conflict_status == ConflictStatus::Detected {
                    debug!(resource = %record.identity(), "Apply skipped: open conflict");
                    continue;
                }
                if let Err(e) = self.apply_record(record, &mut result).await {
                    warn!("Applying {} failed: {}", record.identity(), e);
                    result.errors.push(format!("{}: {}", record.identity(), e));
                }
            }

            let drift = self.record_fabric_drift(fabric_id, false)?;
            result.drift_count = drift;
            result.finish(format!(
                "Applied {} and deleted {} resources",
                result.applied, result.deleted
            ));
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn apply_record(
        &self,
        record: &ResourceRecord,
        result: &mut FabricSyncResult,
    ) -> Result<()> {
        match record.drift_status {
            DriftStatus::DeletionPending => {
                let status = self.cluster.delete(&record.to_manifest()).await?;
                debug!(resource = %record.identity(), ?status, "Deleted from cluster");
                if resource_repo::delete(&self.db, record.id)? {
                    result.deleted += 1;
                } else {
                    resource_repo::update_actual(&self.db, record.id, None)?;
                }
            }
            DriftStatus::DesiredOnly | DriftStatus::CreationPending | DriftStatus::SpecDrift => {
                if record.state != ResourceState::Active {
                    debug!(resource = %record.identity(), "Apply skipped: resource not active");
                    return Ok(());
                }
                let manifest = desired_manifest(record);
                let status = self.cluster.apply(&manifest).await?;
                debug!(resource = %record.identity(), ?status, "Applied to cluster");
                resource_repo::update_actual(&self.db, record.id, Some(&manifest.spec))?;
                result.applied += 1;
            }
            DriftStatus::InSync | DriftStatus::ActualOnly => {}
        }
        Ok(())
    }

    /// Stores the fabric drift summary and returns the drift count.
    fn record_fabric_drift(&self, fabric_id: i64, incomplete: bool) -> Result<usize> {
        let count = resource_repo::list(&self.db, fabric_id, &ResourceFilter::default())?
            .iter()
            .filter(|r| r.drift_status != DriftStatus::InSync)
            .count();
        let status = if incomplete {
            FabricDriftStatus::Unknown
        } else if count > 0 {
            FabricDriftStatus::DriftDetected
        } else {
            FabricDriftStatus::InSync
        };
        let stored = i64::try_from(count)
            .map_err(|_| GitOpsError::Validation(format!("drift count {} out of range", count)))?;
        fabric_repo::update_drift(&self.db, fabric_id, stored, status)?;
        Ok(count)
    }
}

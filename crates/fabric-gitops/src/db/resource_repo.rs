//! Resource repository: the managed records of a fabric.
//!
//! Every write touching one resource is a single statement or a single
//! transaction, so concurrent writers never interleave on a row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::{get_enum, get_json, get_opt_json, get_opt_ts, get_ts, to_opt_ts, to_ts};
use super::{Database, DatabaseError};
use crate::gitops::model::{
    ConflictStatus, DriftStatus, ExternalModification, ResourceFields, ResourceRecord,
    SyncDirection,
};
use crate::gitops::resource::ResourceKind;

fn record_from_row(row: &Row<'_>) -> Result<ResourceRecord, rusqlite::Error> {
    Ok(ResourceRecord {
        id: row.get("id")?,
        fabric_id: row.get("fabric_id")?,
        kind: get_enum(row, "kind")?,
        namespace: row.get("namespace")?,
        name: row.get("name")?,
        api_version: row.get("api_version")?,
        spec: get_json(row, "spec")?,
        desired_spec: get_opt_json(row, "desired_spec")?,
        actual_spec: get_opt_json(row, "actual_spec")?,
        labels: get_json(row, "labels")?,
        annotations: get_json(row, "annotations")?,
        managed_file_path: row.get("managed_file_path")?,
        desired_file_path: row.get("desired_file_path")?,
        file_hash: row.get("file_hash")?,
        remote_sha: row.get("remote_sha")?,
        last_file_sync: get_opt_ts(row, "last_file_sync")?,
        last_updated: get_ts(row, "last_updated")?,
        created_at: get_ts(row, "created_at")?,
        sync_direction: get_enum(row, "sync_direction")?,
        conflict_status: get_enum(row, "conflict_status")?,
        conflict_details: get_opt_json(row, "conflict_details")?,
        external_modifications: get_json(row, "external_modifications")?,
        drift_status: get_enum(row, "drift_status")?,
        state: get_enum(row, "state")?,
        policy_violations: get_json(row, "policy_violations")?,
    })
}

fn json_text(value: &impl serde::Serialize) -> Result<String, DatabaseError> {
    Ok(serde_json::to_string(value)?)
}

fn opt_json_text(value: Option<&Value>) -> Result<Option<String>, DatabaseError> {
    value.map(json_text).transpose()
}

fn fetch(conn: &Connection, id: i64) -> Result<ResourceRecord, DatabaseError> {
    conn.query_row(
        "SELECT * FROM resources WHERE id = ?1",
        params![id],
        record_from_row,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::NotFound(format!("resource {}", id)))
}

/// Query filter for resource listing. `None` / empty means "any".
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub kind: Option<ResourceKind>,
    pub conflict_status: Option<ConflictStatus>,
    pub sync_directions: Vec<SyncDirection>,
}

impl ResourceFilter {
    /// Resources whose GUI-side edits are pushed to Git.
    pub fn pushable() -> Self {
        Self {
            sync_directions: vec![SyncDirection::GuiToGit, SyncDirection::Bidirectional],
            ..Default::default()
        }
    }

    pub fn with_conflict_status(status: ConflictStatus) -> Self {
        Self {
            conflict_status: Some(status),
            ..Default::default()
        }
    }
}

/// Inserts or updates the resource identified by `(fabric, kind, namespace, name)`.
///
/// Returns the stored record and whether it was created. On update the
/// conflict state, external modification log and cluster state are kept;
/// `remote_sha` is kept when `fields.remote_sha` is `None`. The sync
/// direction is kept unless the record gets its first managed file.
pub fn upsert(
    db: &Database,
    fabric_id: i64,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    fields: &ResourceFields,
) -> Result<(ResourceRecord, bool), DatabaseError> {
    if fields.file_hash.is_some() && fields.managed_file_path.is_none() {
        return Err(DatabaseError::Constraint(format!(
            "{}/{}/{}: file_hash requires managed_file_path",
            kind, namespace, name
        )));
    }

    let now = Utc::now();
    let last_updated = to_ts(&fields.last_updated.unwrap_or(now));
    let spec = json_text(&fields.spec)?;
    let desired = opt_json_text(fields.desired_spec.as_ref())?;
    let labels = json_text(&fields.labels)?;
    let annotations = json_text(&fields.annotations)?;
    let violations = json_text(&fields.policy_violations)?;
    let last_file_sync = to_opt_ts(fields.last_file_sync.as_ref());

    db.with_tx(|tx| {
        let existing: Option<(i64, Option<String>)> = tx
            .query_row(
                "SELECT id, actual_spec FROM resources
                 WHERE fabric_id = ?1 AND kind = ?2 AND namespace = ?3 AND name = ?4",
                params![fabric_id, kind.as_str(), namespace, name],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        match existing {
            None => {
                let drift = DriftStatus::compute(fields.desired_spec.as_ref(), None);
                tx.execute(
                    "INSERT INTO resources (fabric_id, kind, namespace, name, api_version, spec,
                     desired_spec, labels, annotations, managed_file_path, desired_file_path,
                     file_hash, remote_sha, last_file_sync, last_updated, created_at,
                     sync_direction, drift_status, state, policy_violations)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19, ?20)",
                    params![
                        fabric_id,
                        kind.as_str(),
                        namespace,
                        name,
                        fields.api_version,
                        spec,
                        desired,
                        labels,
                        annotations,
                        fields.managed_file_path,
                        fields.desired_file_path,
                        fields.file_hash,
                        fields.remote_sha,
                        last_file_sync,
                        last_updated,
                        to_ts(&now),
                        fields.sync_direction.as_str(),
                        drift.as_str(),
                        fields.state.as_str(),
                        violations,
                    ],
                )?;
                let record = fetch(tx, tx.last_insert_rowid())?;
                Ok((record, true))
            }
            Some((id, actual_text)) => {
                let actual: Option<Value> =
                    actual_text.map(|t| serde_json::from_str(&t)).transpose()?;
                let drift = DriftStatus::compute(fields.desired_spec.as_ref(), actual.as_ref());
                tx.execute(
                    "UPDATE resources SET api_version = ?2, spec = ?3, desired_spec = ?4,
                     labels = ?5, annotations = ?6, managed_file_path = ?7,
                     desired_file_path = ?8, file_hash = ?9,
                     remote_sha = COALESCE(?10, remote_sha), last_file_sync = ?11,
                     last_updated = ?12, drift_status = ?13, state = ?14, policy_violations = ?15,
                     sync_direction = CASE WHEN managed_file_path IS NULL AND ?7 IS NOT NULL
                         THEN ?16 ELSE sync_direction END
                     WHERE id = ?1",
                    params![
                        id,
                        fields.api_version,
                        spec,
                        desired,
                        labels,
                        annotations,
                        fields.managed_file_path,
                        fields.desired_file_path,
                        fields.file_hash,
                        fields.remote_sha,
                        last_file_sync,
                        last_updated,
                        drift.as_str(),
                        fields.state.as_str(),
                        violations,
                        fields.sync_direction.as_str(),
                    ],
                )?;
                Ok((fetch(tx, id)?, false))
            }
        }
    })
}

/// Finds a resource by ID.
pub fn get(db: &Database, id: i64) -> Result<Option<ResourceRecord>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM resources WHERE id = ?1",
                params![id],
                record_from_row,
            )
            .optional()?)
    })
}

/// Finds a resource by ID, failing if it does not exist.
pub fn require(db: &Database, id: i64) -> Result<ResourceRecord, DatabaseError> {
    db.with_conn(|conn| fetch(conn, id))
}

/// Finds a resource by its identity.
pub fn find(
    db: &Database,
    fabric_id: i64,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> Result<Option<ResourceRecord>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM resources
                 WHERE fabric_id = ?1 AND kind = ?2 AND namespace = ?3 AND name = ?4",
                params![fabric_id, kind.as_str(), namespace, name],
                record_from_row,
            )
            .optional()?)
    })
}

/// Finds the resource whose managed file is at `path` (layout-relative).
pub fn find_by_managed_path(
    db: &Database,
    fabric_id: i64,
    path: &str,
) -> Result<Option<ResourceRecord>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM resources WHERE fabric_id = ?1 AND managed_file_path = ?2",
                params![fabric_id, path],
                record_from_row,
            )
            .optional()?)
    })
}

/// Lists a fabric's resources ordered by kind, namespace and name.
pub fn list(
    db: &Database,
    fabric_id: i64,
    filter: &ResourceFilter,
) -> Result<Vec<ResourceRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = vec!["fabric_id = ?1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(fabric_id)];

        if let Some(kind) = filter.kind {
            conditions.push(format!("kind = ?{}", param_values.len() + 1));
            param_values.push(Box::new(kind.as_str()));
        }
        if let Some(status) = filter.conflict_status {
            conditions.push(format!("conflict_status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }
        if !filter.sync_directions.is_empty() {
            let mut placeholders = Vec::new();
            for direction in &filter.sync_directions {
                placeholders.push(format!("?{}", param_values.len() + 1));
                param_values.push(Box::new(direction.as_str()));
            }
            conditions.push(format!("sync_direction IN ({})", placeholders.join(", ")));
        }

        let sql = format!(
            "SELECT * FROM resources WHERE {} ORDER BY kind, namespace, name",
            conditions.join(" AND ")
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts a fabric's resources of one kind.
pub fn count_by_kind(
    db: &Database,
    fabric_id: i64,
    kind: ResourceKind,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM resources WHERE fabric_id = ?1 AND kind = ?2",
            params![fabric_id, kind.as_str()],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    })
}

/// Applies a GUI-side edit and bumps `last_updated`.
pub fn update_from_gui(
    db: &Database,
    id: i64,
    spec: &Value,
    labels: Option<&std::collections::BTreeMap<String, String>>,
) -> Result<ResourceRecord, DatabaseError> {
    let spec = json_text(spec)?;
    let labels = labels.map(json_text).transpose()?;
    db.with_tx(|tx| {
        let updated = tx.execute(
            "UPDATE resources SET spec = ?2, labels = COALESCE(?3, labels), last_updated = ?4
             WHERE id = ?1",
            params![id, spec, labels, to_ts(&Utc::now())],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("resource {}", id)));
        }
        fetch(tx, id)
    })
}

/// Result of a successful push of one resource.
#[derive(Debug, Clone)]
pub struct PushedFile {
    pub managed_file_path: String,
    pub file_hash: String,
    pub remote_sha: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// Records a push: the GUI spec becomes the desired state.
pub fn mark_pushed(
    db: &Database,
    id: i64,
    pushed: &PushedFile,
) -> Result<ResourceRecord, DatabaseError> {
    db.with_tx(|tx| {
        let record = fetch(tx, id)?;
        let drift = DriftStatus::compute(Some(&record.spec), record.actual_spec.as_ref());
        tx.execute(
            "UPDATE resources SET managed_file_path = ?2, file_hash = ?3,
             remote_sha = COALESCE(?4, remote_sha), last_file_sync = ?5,
             desired_spec = spec, drift_status = ?6
             WHERE id = ?1",
            params![
                id,
                pushed.managed_file_path,
                pushed.file_hash,
                pushed.remote_sha,
                to_ts(&pushed.synced_at),
                drift.as_str(),
            ],
        )?;
        fetch(tx, id)
    })
}

/// Marks a conflict as detected with its evidence.
pub fn record_conflict(db: &Database, id: i64, details: &Value) -> Result<(), DatabaseError> {
    if details.is_null() || details.as_object().is_some_and(|o| o.is_empty()) {
        return Err(DatabaseError::Constraint(format!(
            "resource {}: conflict details must not be empty",
            id
        )));
    }
    let details = json_text(details)?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE resources SET conflict_status = 'detected', conflict_details = ?2
             WHERE id = ?1",
            params![id, details],
        )?;
        Ok(())
    })
}

/// Appends to the external modification log.
pub fn append_external_modification(
    db: &Database,
    id: i64,
    modification: &ExternalModification,
) -> Result<ResourceRecord, DatabaseError> {
    db.with_tx(|tx| {
        let mut record = fetch(tx, id)?;
        record.external_modifications.push(modification.clone());
        tx.execute(
            "UPDATE resources SET external_modifications = ?2 WHERE id = ?1",
            params![id, json_text(&record.external_modifications)?],
        )?;
        Ok(record)
    })
}

/// Stores Git-side content without touching the GUI-visible spec.
pub fn set_desired_spec(
    db: &Database,
    id: i64,
    desired: &Value,
    desired_file_path: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let record = fetch(tx, id)?;
        let drift = DriftStatus::compute(Some(desired), record.actual_spec.as_ref());
        tx.execute(
            "UPDATE resources SET desired_spec = ?2,
             desired_file_path = COALESCE(?3, desired_file_path), drift_status = ?4
             WHERE id = ?1",
            params![id, json_text(desired)?, desired_file_path, drift.as_str()],
        )?;
        Ok(())
    })
}

/// Values written when a conflict is resolved.
#[derive(Debug, Clone, Default)]
pub struct ResolutionWrite {
    /// Conflict details including the appended resolution entry.
    pub conflict_details: Value,
    /// Replaces the GUI-visible spec (Git-side adoption).
    pub adopt_spec: Option<Value>,
    pub file_hash: Option<String>,
    pub remote_sha: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

/// Transitions `detected -> resolved` and clears the external modification log.
pub fn resolve_conflict(
    db: &Database,
    id: i64,
    write: &ResolutionWrite,
) -> Result<ResourceRecord, DatabaseError> {
    let details = json_text(&write.conflict_details)?;
    let adopt = opt_json_text(write.adopt_spec.as_ref())?;
    let synced = to_opt_ts(write.synced_at.as_ref());
    db.with_tx(|tx| {
        let record = fetch(tx, id)?;
        let spec = write.adopt_spec.as_ref().unwrap_or(&record.spec);
        let desired = if write.adopt_spec.is_some() {
            Some(spec)
        } else {
            record.desired_spec.as_ref()
        };
        let drift = DriftStatus::compute(desired, record.actual_spec.as_ref());
        tx.execute(
            "UPDATE resources SET conflict_status = 'resolved', conflict_details = ?2,
             external_modifications = '[]',
             spec = COALESCE(?3, spec),
             desired_spec = CASE WHEN ?3 IS NULL THEN desired_spec ELSE ?3 END,
             file_hash = CASE WHEN managed_file_path IS NULL THEN file_hash
                 ELSE COALESCE(?4, file_hash) END,
             remote_sha = COALESCE(?5, remote_sha),
             last_file_sync = COALESCE(?6, last_file_sync),
             last_updated = COALESCE(?6, last_updated),
             drift_status = ?7
             WHERE id = ?1",
            params![
                id,
                details,
                adopt,
                write.file_hash,
                write.remote_sha,
                synced,
                drift.as_str(),
            ],
        )?;
        fetch(tx, id)
    })
}

/// Stores the cluster-side spec and recomputes drift.
pub fn update_actual(
    db: &Database,
    id: i64,
    actual: Option<&Value>,
) -> Result<ResourceRecord, DatabaseError> {
    db.with_tx(|tx| {
        let record = fetch(tx, id)?;
        let drift = match record.drift_status {
            DriftStatus::DeletionPending if actual.is_some() => DriftStatus::DeletionPending,
            _ => DriftStatus::compute(record.desired_spec.as_ref(), actual),
        };
        tx.execute(
            "UPDATE resources SET actual_spec = ?2, drift_status = ?3 WHERE id = ?1",
            params![id, opt_json_text(actual)?, drift.as_str()],
        )?;
        fetch(tx, id)
    })
}

pub fn set_drift_status(db: &Database, id: i64, status: DriftStatus) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE resources SET drift_status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    })
}

/// Deletes a resource unless it has a detected conflict.
///
/// Returns false when the row was kept (or did not exist).
pub fn delete(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM resources WHERE id = ?1 AND conflict_status != 'detected'",
            params![id],
        )?;
        Ok(deleted > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fabric_repo::{self, NewFabric};
    use crate::gitops::model::ResourceState;
    use serde_json::json;

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let fabric = fabric_repo::insert(
            &db,
            &NewFabric {
                name: "prod".into(),
                ..Default::default()
            },
        )
        .unwrap();
        (db, fabric.id)
    }

    fn vpc_a(db: &Database, fabric: i64) -> ResourceRecord {
        upsert(db, fabric, ResourceKind::Vpc, "default", "a", &fields(json!({"a": 1})))
            .unwrap()
            .0
    }

    fn fields(spec: Value) -> ResourceFields {
        ResourceFields {
            api_version: "vpc.githedgehog.com/v1beta1".into(),
            desired_spec: Some(spec.clone()),
            spec,
            managed_file_path: Some("managed/vpcs/prod-vpc.yaml".into()),
            file_hash: Some("h1".into()),
            state: ResourceState::Active,
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let (db, fabric) = setup();
        let (created, is_new) = upsert(
            &db,
            fabric,
            ResourceKind::Vpc,
            "default",
            "prod-vpc",
            &fields(json!({"a": 1})),
        )
        .unwrap();
        assert!(is_new);
        assert_eq!(created.drift_status, DriftStatus::DesiredOnly);
        assert_eq!(created.conflict_status, ConflictStatus::None);

        let mut update = fields(json!({"a": 2}));
        update.sync_direction = SyncDirection::GitToGui;
        update.remote_sha = Some("blob1".into());
        let (updated, is_new) = upsert(
            &db,
            fabric,
            ResourceKind::Vpc,
            "default",
            "prod-vpc",
            &update,
        )
        .unwrap();
        assert!(!is_new);
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.spec, json!({"a": 2}));
        assert_eq!(updated.sync_direction, SyncDirection::Bidirectional);
        assert_eq!(updated.remote_sha.as_deref(), Some("blob1"));

        // remote_sha is kept when the write does not carry one
        upsert(&db, fabric, ResourceKind::Vpc, "default", "prod-vpc", &fields(json!({"a": 3})))
            .unwrap();
        let kept = require(&db, created.id).unwrap();
        assert_eq!(kept.remote_sha.as_deref(), Some("blob1"));
    }

    #[test]
    fn test_upsert_rejects_hash_without_path() {
        let (db, fabric) = setup();
        let mut f = fields(json!({"a": 1}));
        f.managed_file_path = None;
        let err = upsert(&db, fabric, ResourceKind::Vpc, "default", "x", &f).unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[test]
    fn test_identity_is_unique_per_namespace() {
        let (db, fabric) = setup();
        upsert(&db, fabric, ResourceKind::Vpc, "default", "a", &fields(json!({"a": 1}))).unwrap();
        upsert(&db, fabric, ResourceKind::Vpc, "tenant", "a", &fields(json!({"a": 1}))).unwrap();
        let switch = fields(json!({"a": 1}));
        upsert(&db, fabric, ResourceKind::Switch, "default", "a", &switch).unwrap();
        assert_eq!(list(&db, fabric, &ResourceFilter::default()).unwrap().len(), 3);
        assert_eq!(count_by_kind(&db, fabric, ResourceKind::Vpc).unwrap(), 2);
        assert!(find(&db, fabric, ResourceKind::Vpc, "tenant", "a").unwrap().is_some());
    }

    #[test]
    fn test_list_filters() {
        let (db, fabric) = setup();
        let mut git_only = fields(json!({"a": 1}));
        git_only.sync_direction = SyncDirection::GitToGui;
        upsert(&db, fabric, ResourceKind::Vpc, "default", "pulled", &git_only).unwrap();
        let pushed = fields(json!({"a": 1}));
        upsert(&db, fabric, ResourceKind::Vpc, "default", "pushed", &pushed).unwrap();

        let pushable = list(&db, fabric, &ResourceFilter::pushable()).unwrap();
        assert_eq!(pushable.len(), 1);
        assert_eq!(pushable[0].name, "pushed");
    }

    #[test]
    fn test_detected_conflict_blocks_delete() {
        let (db, fabric) = setup();
        let record = vpc_a(&db, fabric);

        assert!(record_conflict(&db, record.id, &json!({})).is_err());
        record_conflict(&db, record.id, &json!({"conflict_type": "drift_detected"})).unwrap();
        assert!(!delete(&db, record.id).unwrap());
        assert!(get(&db, record.id).unwrap().is_some());
    }

    #[test]
    fn test_resolve_conflict_clears_modifications() {
        let (db, fabric) = setup();
        let record = vpc_a(&db, fabric);
        append_external_modification(
            &db,
            record.id,
            &ExternalModification {
                detected_at: Utc::now(),
                source: "github".into(),
                description: "edited upstream".into(),
                path: None,
                remote_sha: Some("blob2".into()),
            },
        )
        .unwrap();
        let details = json!({"conflict_type": "external_modification"});
        record_conflict(&db, record.id, &details).unwrap();

        let resolved = resolve_conflict(
            &db,
            record.id,
            &ResolutionWrite {
                conflict_details: json!({
                    "conflict_type": "external_modification",
                    "resolutions": [],
                }),
                adopt_spec: Some(json!({"a": 9})),
                remote_sha: Some("blob2".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(resolved.conflict_status, ConflictStatus::Resolved);
        assert!(resolved.external_modifications.is_empty());
        assert_eq!(resolved.spec, json!({"a": 9}));
        assert_eq!(resolved.remote_sha.as_deref(), Some("blob2"));
        assert!(delete(&db, record.id).unwrap());
    }

    #[test]
    fn test_mark_pushed_sets_desired_and_watermark() {
        let (db, fabric) = setup();
        let mut f = fields(json!({"a": 1}));
        f.desired_spec = None;
        f.file_hash = None;
        let (record, _) = upsert(&db, fabric, ResourceKind::Vpc, "default", "a", &f).unwrap();
        let edited = update_from_gui(&db, record.id, &json!({"a": 2}), None).unwrap();
        assert!(edited.last_updated >= record.last_updated);

        let at = Utc::now();
        let pushed = mark_pushed(
            &db,
            record.id,
            &PushedFile {
                managed_file_path: "managed/vpcs/a.yaml".into(),
                file_hash: "h2".into(),
                remote_sha: Some("blob".into()),
                synced_at: at,
            },
        )
        .unwrap();
        assert_eq!(pushed.desired_spec, Some(json!({"a": 2})));
        assert_eq!(pushed.last_file_sync, Some(at));
        assert!(!pushed.modified_since_sync());
    }

    #[test]
    fn test_update_actual_recomputes_drift() {
        let (db, fabric) = setup();
        let record = vpc_a(&db, fabric);
        let r = update_actual(&db, record.id, Some(&json!({"a": 1}))).unwrap();
        assert_eq!(r.drift_status, DriftStatus::InSync);
        let r = update_actual(&db, record.id, Some(&json!({"a": 5}))).unwrap();
        assert_eq!(r.drift_status, DriftStatus::SpecDrift);

        set_drift_status(&db, record.id, DriftStatus::DeletionPending).unwrap();
        let r = update_actual(&db, record.id, Some(&json!({"a": 5}))).unwrap();
        assert_eq!(r.drift_status, DriftStatus::DeletionPending);
    }

    #[test]
    fn test_first_managed_file_sets_sync_direction() {
        let (db, fabric) = setup();
        let discovered = ResourceFields {
            api_version: "vpc.githedgehog.com/v1beta1".into(),
            spec: json!({"a": 1}),
            sync_direction: SyncDirection::GitToGui,
            ..Default::default()
        };
        let (record, _) =
            upsert(&db, fabric, ResourceKind::Vpc, "default", "a", &discovered).unwrap();
        assert!(!record.sync_direction.pushes_to_git());

        let managed = vpc_a(&db, fabric);
        assert_eq!(managed.sync_direction, SyncDirection::Bidirectional);

        let mut inbound = fields(json!({"a": 2}));
        inbound.sync_direction = SyncDirection::GitToGui;
        let (kept, _) = upsert(&db, fabric, ResourceKind::Vpc, "default", "a", &inbound).unwrap();
        assert_eq!(kept.sync_direction, SyncDirection::Bidirectional);
    }
}

//! Fabric repository: CRUD operations for the `fabrics` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{get_enum, get_opt_ts, to_opt_ts, Database, DatabaseError};
use crate::gitops::model::{Fabric, FabricDriftStatus, OnboardingStatus};

fn fabric_from_row(row: &Row<'_>) -> Result<Fabric, rusqlite::Error> {
    Ok(Fabric {
        id: row.get("id")?,
        name: row.get("name")?,
        gitops_directory: row.get("gitops_directory")?,
        gitops_initialized: row.get("gitops_initialized")?,
        git_repository_id: row.get("git_repository_id")?,
        desired_state_commit: row.get("desired_state_commit")?,
        drift_count: row.get("drift_count")?,
        drift_status: get_enum(row, "drift_status")?,
        last_directory_sync: get_opt_ts(row, "last_directory_sync")?,
        onboarding_status: get_enum(row, "onboarding_status")?,
    })
}

/// Values for a new fabric.
#[derive(Debug, Clone, Default)]
pub struct NewFabric {
    pub name: String,
    pub gitops_directory: String,
    pub git_repository_id: Option<i64>,
}

/// Inserts a fabric and returns it.
pub fn insert(db: &Database, fabric: &NewFabric) -> Result<Fabric, DatabaseError> {
    let id = db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO fabrics (name, gitops_directory, git_repository_id) VALUES (?1, ?2, ?3)",
            params![fabric.name, fabric.gitops_directory, fabric.git_repository_id],
        )?;
        Ok(conn.last_insert_rowid())
    })?;
    require(db, id)
}

/// Finds a fabric by ID.
pub fn get(db: &Database, id: i64) -> Result<Option<Fabric>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row("SELECT * FROM fabrics WHERE id = ?1", params![id], fabric_from_row)
            .optional()?)
    })
}

/// Finds a fabric by ID, failing if it does not exist.
pub fn require(db: &Database, id: i64) -> Result<Fabric, DatabaseError> {
    get(db, id)?.ok_or_else(|| DatabaseError::NotFound(format!("fabric {}", id)))
}

/// Lists all fabrics ordered by ID.
pub fn list(db: &Database) -> Result<Vec<Fabric>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM fabrics ORDER BY id")?;
        let rows = stmt
            .query_map([], fabric_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists fabrics whose GitOps layout has been initialized.
pub fn list_initialized(db: &Database) -> Result<Vec<Fabric>, DatabaseError> {
    Ok(list(db)?
        .into_iter()
        .filter(|f| f.gitops_initialized)
        .collect())
}

/// Marks the directory layout as present.
pub fn mark_initialized(db: &Database, id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE fabrics SET gitops_initialized = 1, last_directory_sync = ?2,
             onboarding_status = CASE WHEN onboarding_status = 'not_started'
                 THEN 'structure_initialized' ELSE onboarding_status END
             WHERE id = ?1",
            params![id, to_opt_ts(Some(&at))],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("fabric {}", id)));
        }
        Ok(())
    })
}

pub fn set_onboarding_status(
    db: &Database,
    id: i64,
    status: OnboardingStatus,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE fabrics SET onboarding_status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    })
}

/// Records the last commit pulled from or pushed to the repository.
pub fn set_desired_state_commit(
    db: &Database,
    id: i64,
    commit: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE fabrics SET desired_state_commit = ?2 WHERE id = ?1",
            params![id, commit],
        )?;
        Ok(())
    })
}

pub fn touch_directory_sync(
    db: &Database,
    id: i64,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE fabrics SET last_directory_sync = ?2 WHERE id = ?1",
            params![id, to_opt_ts(Some(&at))],
        )?;
        Ok(())
    })
}

/// Stores the fabric-level drift summary.
pub fn update_drift(
    db: &Database,
    id: i64,
    drift_count: i64,
    status: FabricDriftStatus,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE fabrics SET drift_count = ?2, drift_status = ?3 WHERE id = ?1",
            params![id, drift_count, status.as_str()],
        )?;
        Ok(())
    })
}

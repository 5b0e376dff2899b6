//! Sync operation repository: audit entries for orchestrator runs.

use rusqlite::{params, OptionalExtension, Row};

use super::{get_enum, get_opt_ts, get_ts, to_opt_ts, to_ts, Database, DatabaseError};
use crate::gitops::model::{OperationCounters, SyncOperation};

fn operation_from_row(row: &Row<'_>) -> Result<SyncOperation, rusqlite::Error> {
    Ok(SyncOperation {
        id: row.get("id")?,
        fabric_id: row.get("fabric_id")?,
        operation_type: get_enum(row, "operation_type")?,
        status: get_enum(row, "status")?,
        counters: OperationCounters {
            files_processed: row.get("files_processed")?,
            files_created: row.get("files_created")?,
            files_updated: row.get("files_updated")?,
            files_deleted: row.get("files_deleted")?,
            conflicts_detected: row.get("conflicts_detected")?,
        },
        commit_sha: row.get("commit_sha")?,
        error_message: row.get("error_message")?,
        created_at: get_ts(row, "created_at")?,
        started_at: get_opt_ts(row, "started_at")?,
        completed_at: get_opt_ts(row, "completed_at")?,
    })
}

/// Inserts a new audit entry.
pub fn insert(db: &Database, op: &SyncOperation) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sync_operations (id, fabric_id, operation_type, status, files_processed,
             files_created, files_updated, files_deleted, conflicts_detected, commit_sha,
             error_message, created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                op.id,
                op.fabric_id,
                op.operation_type.as_str(),
                op.status.as_str(),
                op.counters.files_processed,
                op.counters.files_created,
                op.counters.files_updated,
                op.counters.files_deleted,
                op.counters.conflicts_detected,
                op.commit_sha,
                op.error_message,
                to_ts(&op.created_at),
                to_opt_ts(op.started_at.as_ref()),
                to_opt_ts(op.completed_at.as_ref()),
            ],
        )?;
        Ok(())
    })
}

/// Writes status, counters and timestamps.
///
/// A row that already holds a terminal status is left untouched.
pub fn update(db: &Database, op: &SyncOperation) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE sync_operations SET status = ?2, files_processed = ?3, files_created = ?4,
             files_updated = ?5, files_deleted = ?6, conflicts_detected = ?7, commit_sha = ?8,
             error_message = ?9, started_at = ?10, completed_at = ?11
             WHERE id = ?1 AND status NOT IN ('completed', 'failed', 'cancelled')",
            params![
                op.id,
                op.status.as_str(),
                op.counters.files_processed,
                op.counters.files_created,
                op.counters.files_updated,
                op.counters.files_deleted,
                op.counters.conflicts_detected,
                op.commit_sha,
                op.error_message,
                to_opt_ts(op.started_at.as_ref()),
                to_opt_ts(op.completed_at.as_ref()),
            ],
        )?;
        Ok(updated > 0)
    })
}

/// Finds an entry by ID.
pub fn get(db: &Database, id: &str) -> Result<Option<SyncOperation>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM sync_operations WHERE id = ?1",
                params![id],
                operation_from_row,
            )
            .optional()?)
    })
}

/// Lists a fabric's entries, newest first.
pub fn list_for_fabric(
    db: &Database,
    fabric_id: i64,
    limit: u32,
) -> Result<Vec<SyncOperation>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM sync_operations WHERE fabric_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![fabric_id, limit], operation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

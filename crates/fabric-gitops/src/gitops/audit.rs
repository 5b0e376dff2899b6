//! Audit trail helpers around [`SyncOperation`].
//!
//! Audit writes never fail the operation they describe: a failed write is
//! logged and the in-memory record is still returned.

use tracing::warn;

use crate::db::{operation_repo, Database};

use super::model::{OperationCounters, OperationStatus, OperationType, SyncOperation};

/// Creates the operation as `pending`, then moves it to `in_progress`.
pub fn begin(db: &Database, fabric_id: i64, operation_type: OperationType) -> SyncOperation {
    let mut op = SyncOperation::new(fabric_id, operation_type);
    if let Err(e) = operation_repo::insert(db, &op) {
        warn!(operation_id = %op.id, "Failed to record sync operation: {}", e);
        op.start();
        return op;
    }
    op.start();
    if let Err(e) = operation_repo::update(db, &op) {
        warn!(operation_id = %op.id, "Failed to mark sync operation in progress: {}", e);
    }
    op
}

/// Sets the terminal status, counters and commit, exactly once.
pub fn finish(
    db: &Database,
    op: &mut SyncOperation,
    status: OperationStatus,
    counters: OperationCounters,
    commit_sha: Option<String>,
    error_message: Option<String>,
) {
    op.counters = counters;
    if commit_sha.is_some() {
        op.commit_sha = commit_sha;
    }
    if !op.finish(status, error_message) {
        warn!(operation_id = %op.id, "Sync operation already finished as {}", op.status);
        return;
    }
    if let Err(e) = operation_repo::update(db, op) {
        warn!(operation_id = %op.id, "Failed to finish sync operation: {}", e);
    }
}

/// Records an operation that was skipped before it started.
pub fn cancelled(
    db: &Database,
    fabric_id: i64,
    operation_type: OperationType,
    reason: &str,
) -> SyncOperation {
    let mut op = SyncOperation::new(fabric_id, operation_type);
    op.finish(OperationStatus::Cancelled, Some(reason.to_string()));
    if let Err(e) = operation_repo::insert(db, &op) {
        warn!(operation_id = %op.id, "Failed to record cancelled operation: {}", e);
    }
    op
}

//! Git repository binding repository: CRUD for the `git_repositories` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{get_enum, Database, DatabaseError};
use crate::gitops::model::{ConnectionStatus, GitRepositoryBinding};

fn binding_from_row(row: &Row<'_>) -> Result<GitRepositoryBinding, rusqlite::Error> {
    Ok(GitRepositoryBinding {
        id: row.get("id")?,
        url: row.get("url")?,
        default_branch: row.get("default_branch")?,
        push_branch: row.get("push_branch")?,
        encrypted_credentials: row.get("encrypted_credentials")?,
        direct_push_enabled: row.get("direct_push_enabled")?,
        connection_status: get_enum(row, "connection_status")?,
    })
}

/// Values for a new binding.
#[derive(Debug, Clone)]
pub struct NewGitRepository {
    pub url: String,
    pub default_branch: String,
    pub push_branch: Option<String>,
    pub encrypted_credentials: Option<String>,
    pub direct_push_enabled: bool,
    pub connection_status: ConnectionStatus,
}

/// Inserts a binding. Direct push requires a connected, credentialed binding.
pub fn insert(
    db: &Database,
    repo: &NewGitRepository,
) -> Result<GitRepositoryBinding, DatabaseError> {
    let candidate = GitRepositoryBinding {
        id: 0,
        url: repo.url.clone(),
        default_branch: repo.default_branch.clone(),
        push_branch: repo.push_branch.clone(),
        encrypted_credentials: repo.encrypted_credentials.clone(),
        direct_push_enabled: repo.direct_push_enabled,
        connection_status: repo.connection_status,
    };
    if candidate.direct_push_enabled {
        candidate
            .check_push_allowed()
            .map_err(DatabaseError::Constraint)?;
    }

    let id = db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO git_repositories (url, default_branch, push_branch, encrypted_credentials,
             direct_push_enabled, connection_status) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                repo.url,
                repo.default_branch,
                repo.push_branch,
                repo.encrypted_credentials,
                repo.direct_push_enabled,
                repo.connection_status.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })?;
    get(db, id)?.ok_or_else(|| DatabaseError::NotFound(format!("git repository {}", id)))
}

/// Finds a binding by ID.
pub fn get(db: &Database, id: i64) -> Result<Option<GitRepositoryBinding>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM git_repositories WHERE id = ?1",
                params![id],
                binding_from_row,
            )
            .optional()?)
    })
}

/// Updates the connection status. Losing the connection disables direct push.
pub fn set_connection_status(
    db: &Database,
    id: i64,
    status: ConnectionStatus,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE git_repositories SET connection_status = ?2,
             direct_push_enabled = CASE WHEN ?2 = 'connected' THEN direct_push_enabled ELSE 0 END
             WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    })
}

/// Enables or disables direct push, checking the binding invariant first.
pub fn set_direct_push(db: &Database, id: i64, enabled: bool) -> Result<(), DatabaseError> {
    let mut binding =
        get(db, id)?.ok_or_else(|| DatabaseError::NotFound(format!("git repository {}", id)))?;
    binding.direct_push_enabled = enabled;
    if enabled {
        binding
            .check_push_allowed()
            .map_err(DatabaseError::Constraint)?;
    }
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE git_repositories SET direct_push_enabled = ?2 WHERE id = ?1",
            params![id, enabled],
        )?;
        Ok(())
    })
}

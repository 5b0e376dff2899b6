//! Conflict detection and resolution between GUI-side and Git-side state.
//!
//! Detection is a per-record heuristic over stored state, no content diffing:
//!
//! 1. a non-empty external modification log is an `external_modification`
//! 2. otherwise `spec_drift` is `drift_detected`
//! 3. otherwise a GUI edit newer than the last file sync is `concurrent_modification`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::codec;
use super::error::{GitOpsError, Result};
use super::model::{ConflictStatus, DriftStatus, ResourceRecord};
use crate::db::resource_repo::{self, ResolutionWrite};
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ExternalModification,
    DriftDetected,
    ConcurrentModification,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::ExternalModification => "external_modification",
            ConflictType::DriftDetected => "drift_detected",
            ConflictType::ConcurrentModification => "concurrent_modification",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected conflict, persisted into the record's conflict details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub resource_id: i64,
    pub conflict_type: ConflictType,
    pub gui_timestamp: DateTime<Utc>,
    pub github_timestamp: Option<DateTime<Utc>>,
    pub evidence: Value,
    pub detected_at: DateTime<Utc>,
}

impl ConflictInfo {
    /// Incoming content for a record that has unsynced GUI edits.
    pub fn concurrent(record: &ResourceRecord, source: &str, sha: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            resource_id: record.id,
            conflict_type: ConflictType::ConcurrentModification,
            gui_timestamp: record.last_updated,
            github_timestamp: Some(now),
            evidence: json!({
                "source": source,
                "remote_sha": sha,
                "known_remote_sha": record.remote_sha,
                "last_file_sync": record.last_file_sync,
                "last_updated": record.last_updated,
            }),
            detected_at: now,
        }
    }

    /// Conflict details to store, carrying over earlier resolution history.
    pub fn to_details(&self, previous: Option<&Value>) -> Value {
        let history = previous
            .and_then(|p| p.get("resolutions"))
            .cloned()
            .unwrap_or_else(|| json!([]));
        json!({
            "conflict_type": self.conflict_type,
            "resource_id": self.resource_id,
            "gui_timestamp": self.gui_timestamp,
            "github_timestamp": self.github_timestamp,
            "evidence": self.evidence,
            "detected_at": self.detected_at,
            "resolutions": history,
        })
    }
}

/// Git-side timestamp of a record: the last observed external change, else the last sync.
fn github_timestamp(record: &ResourceRecord) -> Option<DateTime<Utc>> {
    record
        .external_modifications
        .iter()
        .map(|m| m.detected_at)
        .max()
        .or(record.last_file_sync)
}

/// Classifies a record's GUI/Git relationship.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Returns the first matching conflict, or `None` when the record is in sync.
    pub fn detect(record: &ResourceRecord) -> Option<ConflictInfo> {
        let (conflict_type, evidence) = if !record.external_modifications.is_empty() {
            (
                ConflictType::ExternalModification,
                json!({
                    "modifications": record.external_modifications,
                    "count": record.external_modifications.len(),
                }),
            )
        } else if record.drift_status == DriftStatus::SpecDrift {
            (
                ConflictType::DriftDetected,
                json!({
                    "desired_spec": record.desired_spec,
                    "actual_spec": record.actual_spec,
                }),
            )
        } else if record.modified_since_sync() {
            (
                ConflictType::ConcurrentModification,
                json!({
                    "last_updated": record.last_updated,
                    "last_file_sync": record.last_file_sync,
                    "remote_sha": record.remote_sha,
                }),
            )
        } else {
            return None;
        };

        Some(ConflictInfo {
            resource_id: record.id,
            conflict_type,
            gui_timestamp: record.last_updated,
            github_timestamp: github_timestamp(record),
            evidence,
            detected_at: Utc::now(),
        })
    }
}

/// How a detected conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Newer side wins, outside the clock-skew tolerance.
    Timestamp,
    GuiWins,
    GithubWins,
    /// Keeps the GUI spec and tags the resolution `merge_attempted`; no field merge.
    Merge,
    /// Leaves the conflict detected for a person to decide.
    #[default]
    UserGuided,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Timestamp => "timestamp",
            ConflictStrategy::GuiWins => "gui_wins",
            ConflictStrategy::GithubWins => "github_wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::UserGuided => "user_guided",
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "timestamp" => Ok(ConflictStrategy::Timestamp),
            "gui_wins" => Ok(ConflictStrategy::GuiWins),
            "github_wins" => Ok(ConflictStrategy::GithubWins),
            "merge" => Ok(ConflictStrategy::Merge),
            "user_guided" => Ok(ConflictStrategy::UserGuided),
            other => Err(format!("invalid conflict strategy: {}", other)),
        }
    }
}

/// What a resolution does to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// GUI spec stays and must be pushed over the remote.
    KeepGui,
    /// Git-side spec replaces the GUI spec.
    AdoptGit,
    /// Resolved with the GUI spec kept, tagged `merge_attempted`.
    MergeAttempted,
    /// Still detected.
    Deferred,
}

/// Decides the outcome of a strategy for a record. Pure.
pub fn plan_resolution(
    record: &ResourceRecord,
    strategy: ConflictStrategy,
    skew_tolerance: chrono::Duration,
) -> ResolutionOutcome {
    match strategy {
        ConflictStrategy::GuiWins => ResolutionOutcome::KeepGui,
        ConflictStrategy::GithubWins => ResolutionOutcome::AdoptGit,
        ConflictStrategy::Merge => ResolutionOutcome::MergeAttempted,
        ConflictStrategy::UserGuided => ResolutionOutcome::Deferred,
        ConflictStrategy::Timestamp => match github_timestamp(record) {
            None => ResolutionOutcome::KeepGui,
            Some(git_ts) => {
                let delta = record.last_updated - git_ts;
                if delta > skew_tolerance {
                    ResolutionOutcome::KeepGui
                } else if -delta > skew_tolerance {
                    ResolutionOutcome::AdoptGit
                } else {
                    ResolutionOutcome::Deferred
                }
            }
        },
    }
}

/// Result of resolving one record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub resource_id: i64,
    pub outcome: ResolutionOutcome,
    /// The stored record after resolution.
    #[serde(skip)]
    pub record: Option<ResourceRecord>,
}

impl ResolutionResult {
    pub fn resolved(&self) -> bool {
        self.outcome != ResolutionOutcome::Deferred
    }

    /// Whether the GUI spec has to be force-pushed to settle the conflict.
    pub fn needs_push(&self) -> bool {
        self.outcome == ResolutionOutcome::KeepGui
    }
}

/// Records detected conflicts and applies resolution strategies.
#[derive(Clone)]
pub struct ConflictService {
    db: Database,
    skew_tolerance: chrono::Duration,
}

impl ConflictService {
    pub fn new(db: Database, skew_tolerance: chrono::Duration) -> Self {
        Self { db, skew_tolerance }
    }

    /// Runs detection and stores a hit as `detected`.
    pub fn detect_and_record(&self, record: &ResourceRecord) -> Result<Option<ConflictInfo>> {
        let Some(info) = ConflictDetector::detect(record) else {
            return Ok(None);
        };
        self.record(record, &info)?;
        Ok(Some(info))
    }

    /// Stores a conflict found by the caller.
    pub fn record(&self, record: &ResourceRecord, info: &ConflictInfo) -> Result<()> {
        let details = info.to_details(record.conflict_details.as_ref());
        resource_repo::record_conflict(&self.db, record.id, &details)?;
        info!(
            resource = %record.identity(),
            conflict_type = %info.conflict_type,
            "Conflict detected"
        );
        Ok(())
    }

    /// Applies a strategy to a record in `detected` state.
    ///
    /// Every resolution appends `{strategy, actor, resolved_at, outcome}` to
    /// the details and acknowledges the external modification log.
    pub fn resolve(
        &self,
        record: &ResourceRecord,
        strategy: ConflictStrategy,
        actor: &str,
    ) -> Result<ResolutionResult> {
        if record.conflict_status != ConflictStatus::Detected {
            return Err(GitOpsError::Validation(format!(
                "{} has no detected conflict",
                record.identity()
            )));
        }

        let outcome = plan_resolution(record, strategy, self.skew_tolerance);
        if outcome == ResolutionOutcome::Deferred {
            debug!(
                resource = %record.identity(),
                strategy = strategy.as_str(),
                "Resolution deferred"
            );
            return Ok(ResolutionResult {
                resource_id: record.id,
                outcome,
                record: None,
            });
        }

        let now = Utc::now();
        let latest_remote_sha = record
            .external_modifications
            .iter()
            .rev()
            .find_map(|m| m.remote_sha.clone());

        let mut entry = json!({
            "strategy": strategy.as_str(),
            "actor": actor,
            "resolved_at": now,
            "outcome": outcome,
            "acknowledged_modifications": record.external_modifications,
        });
        if outcome == ResolutionOutcome::MergeAttempted {
            entry["tag"] = json!("merge_attempted");
        }

        let mut details = record
            .conflict_details
            .clone()
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));
        match details.get_mut("resolutions").and_then(Value::as_array_mut) {
            Some(list) => list.push(entry),
            None => details["resolutions"] = json!([entry]),
        }

        let mut write = ResolutionWrite {
            conflict_details: details,
            remote_sha: latest_remote_sha,
            ..Default::default()
        };

        if outcome == ResolutionOutcome::AdoptGit {
            let desired = record.desired_spec.clone().ok_or_else(|| GitOpsError::Conflict {
                path: record.identity(),
                message: "no Git-side content to adopt".to_string(),
            })?;
            let mut manifest = record.to_manifest();
            manifest.spec = desired.clone();
            let (_, hash) = codec::encode_with_hash(&manifest)?;
            write.adopt_spec = Some(desired);
            write.file_hash = Some(hash);
            write.synced_at = Some(now);
        }

        let stored = resource_repo::resolve_conflict(&self.db, record.id, &write)?;
        info!(
            resource = %record.identity(),
            strategy = strategy.as_str(),
            actor,
            "Conflict resolved"
        );
        Ok(ResolutionResult {
            resource_id: record.id,
            outcome,
            record: Some(stored),
        })
    }
}

use std::path::{Component, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, info_span, warn};
use walkdir::WalkDir;

use super::archive;
use super::context::{DocumentContext, FileContext, RemoteOrigin};
use super::summary::{FileOutcome, FileStage, IngestionResult, StageSummary};
use super::IngestError;
use crate::db::{resource_repo, Database};
use crate::gitops::codec;
use crate::gitops::conflict::ConflictInfo;
use crate::gitops::error::GitOpsError;
use crate::gitops::layout::{is_manifest_file, resource_path, DirectoryLayout};
use crate::gitops::model::{
    ConflictStatus, ExternalModification, ResourceFields, ResourceRecord, ResourceState,
    SyncDirection,
};
use crate::gitops::resource::{Manifest, ObjectMeta, ResourceKind, DEFAULT_NAMESPACE};
use crate::gitops::validation::{has_blocking, PolicyContext, PolicyEngine};

/// What processing did with one document.
enum Processed {
    Stored(ResourceRecord, bool),
    /// Held back; the record had GUI edits not yet synced.
    Conflict(ResourceRecord, ConflictInfo),
}

/// Source tag of modifications that arrive through raw intake.
const INTAKE_SOURCE: &str = "raw_intake";

/// Runs raw manifest files through the ingestion stages.
pub struct Ingestor {
    db: Database,
    policy: Arc<PolicyEngine>,
}

impl Ingestor {
    pub fn new(db: Database, policy: Arc<PolicyEngine>) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Ingests every manifest directly under `raw/` and `raw/pending/`.
    pub fn ingest_directory(
        &self,
        fabric_id: i64,
        layout: &DirectoryLayout,
    ) -> Result<IngestionResult, IngestError> {
        let mut discovery = StageSummary::default();
        let files = discover(layout, &mut discovery)?;
        Ok(self.run(fabric_id, layout, files, discovery))
    }

    /// Ingests specific files. Each must be a manifest directly under
    /// `raw/` or `raw/pending/`; relative paths are taken from the layout root.
    pub fn ingest_files(
        &self,
        fabric_id: i64,
        layout: &DirectoryLayout,
        paths: &[PathBuf],
    ) -> Result<IngestionResult, IngestError> {
        let mut discovery = StageSummary::default();
        let mut files = Vec::new();
        for path in paths {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                layout.root().join(path)
            };
            let in_intake = path.parent().is_some_and(|p| {
                p == layout.raw_dir().as_path() || p == layout.pending_dir().as_path()
            });
            if !in_intake || path.components().any(|c| c == Component::ParentDir) {
                return Err(IngestError::NotRawFile(path));
            }
            let relative = layout
                .relative_of(&path)
                .unwrap_or_else(|| path.display().to_string());
            if !path.is_file() {
                discovery.fail(format!("{}: file does not exist", relative));
                continue;
            }
            if !is_manifest_file(&relative) {
                discovery.fail(format!("{}: not a YAML file", relative));
                continue;
            }
            discovery.succeed();
            files.push(FileContext::new(path, relative, None));
        }
        Ok(self.run(fabric_id, layout, files, discovery))
    }

    /// Ingests files pulled from the repository and staged locally.
    ///
    /// Records written from them carry the origin's path and blob SHA.
    pub fn ingest_staged(
        &self,
        fabric_id: i64,
        layout: &DirectoryLayout,
        staged: Vec<(PathBuf, RemoteOrigin)>,
    ) -> IngestionResult {
        let mut discovery = StageSummary::default();
        let files = staged
            .into_iter()
            .map(|(path, origin)| {
                discovery.succeed();
                let relative = layout
                    .relative_of(&path)
                    .unwrap_or_else(|| path.display().to_string());
                FileContext::new(path, relative, Some(origin))
            })
            .collect();
        self.run(fabric_id, layout, files, discovery)
    }

    fn run(
        &self,
        fabric_id: i64,
        layout: &DirectoryLayout,
        mut files: Vec<FileContext>,
        discovery: StageSummary,
    ) -> IngestionResult {
        let _run_span = info_span!("ingest", fabric_id, files = files.len()).entered();
        let mut result = IngestionResult {
            discovery,
            ..Default::default()
        };

        {
            let _step = info_span!("validate").entered();
            for ctx in files.iter_mut() {
                self.step_validate(ctx, &mut result.validation);
            }
        }

        {
            let _step = info_span!("classify").entered();
            for ctx in files.iter_mut() {
                self.step_classify(ctx, &mut result.classification);
            }
        }

        {
            let _step = info_span!("process").entered();
            for ctx in files.iter_mut() {
                self.step_process(fabric_id, layout, ctx, &mut result);
            }
        }

        {
            let _step = info_span!("archive").entered();
            for ctx in files.iter_mut() {
                let outcome = self.step_archive(layout, ctx, &mut result.archive);
                result.files.push(outcome);
            }
        }

        result.finalize();
        info!(
            fabric_id,
            created = result.resources_created,
            updated = result.resources_updated,
            success_rate = result.success_rate,
            "{}",
            result.message
        );
        result
    }

    fn step_validate(&self, ctx: &mut FileContext, summary: &mut StageSummary) {
        let bytes = match std::fs::read(&ctx.source_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = format!("cannot read file: {}", e);
                summary.fail(format!("{}: {}", ctx.relative_path, message));
                ctx.error = Some(format!("validation: {}", message));
                return;
            }
        };

        let stream = match codec::decode(&bytes, &ctx.source_path) {
            Ok(stream) => stream,
            Err(e) => {
                summary.fail(format!("{}: {}", ctx.relative_path, e));
                ctx.error = Some(format!("validation: {}", e));
                return;
            }
        };

        for warning in stream.warnings {
            let warning = format!("{}: {}", ctx.relative_path, warning);
            summary.warn(warning.clone());
            ctx.warnings.push(warning);
        }

        if stream.documents.is_empty() {
            summary.fail(format!("{}: no manifest documents", ctx.relative_path));
            ctx.error = Some("validation: no manifest documents".to_string());
            return;
        }

        for (index, document) in stream.documents.into_iter().enumerate() {
            let mut doc = DocumentContext::new(index, document);
            let violations = self.policy.validate_structure(&doc.document);
            if has_blocking(&violations) {
                let messages: Vec<&str> = violations.iter().map(|v| v.message.as_str()).collect();
                let message = messages.join("; ");
                summary.fail(format!("{} document {}: {}", ctx.relative_path, index, message));
                doc.fail("validation", message);
            } else {
                summary.succeed();
            }
            doc.violations = violations;
            ctx.documents.push(doc);
        }
    }

    fn step_classify(&self, ctx: &mut FileContext, summary: &mut StageSummary) {
        for doc in ctx.documents.iter_mut().filter(|d| d.is_live()) {
            let kind = doc
                .document
                .get("kind")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            match kind.parse::<ResourceKind>() {
                Ok(kind) => {
                    let namespace = doc
                        .document
                        .pointer("/metadata/namespace")
                        .and_then(Value::as_str)
                        .filter(|ns| !ns.is_empty())
                        .unwrap_or(DEFAULT_NAMESPACE);
                    doc.target_path = Some(resource_path(kind, namespace, doc.name()));
                    doc.kind = Some(kind);
                    summary.succeed();
                }
                Err(message) => {
                    let error = GitOpsError::UnsupportedKind(kind);
                    summary.fail(format!(
                        "{} document {}: {}",
                        ctx.relative_path, doc.index, error
                    ));
                    doc.violations.extend(self.policy.check_kind(&doc.document));
                    doc.fail("classification", message);
                }
            }
        }
    }

    fn step_process(
        &self,
        fabric_id: i64,
        layout: &DirectoryLayout,
        ctx: &mut FileContext,
        result: &mut IngestionResult,
    ) {
        let source = ctx
            .origin
            .as_ref()
            .map(|o| o.path.clone())
            .unwrap_or_else(|| ctx.relative_path.clone());

        for doc in ctx.documents.iter_mut().filter(|d| d.is_live()) {
            let origin = ctx.origin.as_ref();
            match self.process_document(fabric_id, layout, doc, &source, origin) {
                Ok(Processed::Conflict(record, info)) => {
                    let warning = format!(
                        "{} document {}: {} has unsynced GUI edits; kept as a conflict",
                        ctx.relative_path,
                        doc.index,
                        record.identity()
                    );
                    warn!("{}", warning);
                    result.processing.succeed();
                    result.processing.warn(warning);
                    if !result.touched_resource_ids.contains(&record.id) {
                        result.touched_resource_ids.push(record.id);
                    }
                    result.conflicts.push(info);
                }
                Ok(Processed::Stored(record, created)) => {
                    if created {
                        result.resources_created += 1;
                    } else {
                        result.resources_updated += 1;
                    }
                    if !result.touched_resource_ids.contains(&record.id) {
                        result.touched_resource_ids.push(record.id);
                    }
                    debug!(resource = %record.identity(), created, "Ingested document");
                    ctx.ingested.push(record.identity());
                    result.processing.succeed();
                }
                Err(e) => {
                    warn!("{} document {}: {}", ctx.relative_path, doc.index, e);
                    result
                        .processing
                        .fail(format!("{} document {}: {}", ctx.relative_path, doc.index, e));
                    doc.fail("processing", e.to_string());
                }
            }
        }
    }

    fn process_document(
        &self,
        fabric_id: i64,
        layout: &DirectoryLayout,
        doc: &mut DocumentContext,
        source: &str,
        origin: Option<&RemoteOrigin>,
    ) -> Result<Processed, IngestError> {
        let (Some(kind), Some(target)) = (doc.kind, doc.target_path.clone()) else {
            return Err(GitOpsError::Validation("document was not classified".into()).into());
        };
        let manifest = Manifest::from_document(&doc.document).map_err(|e| GitOpsError::Parse {
            path: PathBuf::from(source),
            message: e.to_string(),
        })?;
        let namespace = manifest.metadata.namespace_or_default().to_string();
        let name = manifest.metadata.name.clone();

        let existing = resource_repo::find(&self.db, fabric_id, kind, &namespace, &name)?;
        if existing
            .as_ref()
            .is_some_and(|r| r.conflict_status == ConflictStatus::Detected)
        {
            return Err(GitOpsError::Conflict {
                path: target,
                message: "resource has an unresolved conflict".into(),
            }
            .into());
        }
        let remote_sha = origin.and_then(|o| o.sha_for(&target));
        if let Some(record) = existing.as_ref().filter(|r| r.modified_since_sync()) {
            return self
                .hold_back(record, &manifest.spec, source, remote_sha)
                .map(|info| Processed::Conflict(record.clone(), info));
        }

        let policy_ctx = PolicyContext {
            existing_of_kind: resource_repo::count_by_kind(&self.db, fabric_id, kind)?,
            is_new: existing.is_none(),
        };
        let violations = self.policy.evaluate_policies(&doc.document, policy_ctx);
        let blocked = has_blocking(&violations);

        let api_version = if manifest.api_version.is_empty() {
            kind.default_api_version().to_string()
        } else {
            manifest.api_version.clone()
        };
        let canonical = Manifest {
            api_version: api_version.clone(),
            kind: kind.as_str().to_string(),
            metadata: ObjectMeta {
                name: name.clone(),
                namespace: (namespace != DEFAULT_NAMESPACE).then(|| namespace.clone()),
                labels: manifest.metadata.labels.clone(),
                annotations: manifest.metadata.annotations.clone(),
            },
            spec: manifest.spec.clone(),
        };
        let (yaml, hash) = codec::encode_with_hash(&canonical)?;
        layout.write_managed(&target, &yaml)?;

        // One timestamp for both watermarks so the record does not read as
        // modified since sync.
        let now = Utc::now();
        let fields = ResourceFields {
            api_version,
            spec: canonical.spec.clone(),
            desired_spec: Some(canonical.spec.clone()),
            labels: canonical.metadata.labels.clone(),
            annotations: canonical.metadata.annotations.clone(),
            managed_file_path: Some(target),
            desired_file_path: Some(source.to_string()),
            file_hash: Some(hash),
            remote_sha,
            last_file_sync: Some(now),
            last_updated: Some(now),
            sync_direction: SyncDirection::Bidirectional,
            state: if blocked {
                ResourceState::Pending
            } else {
                ResourceState::Active
            },
            policy_violations: violations.clone(),
        };
        if blocked {
            warn!(
                "{}/{}/{} kept pending by blocking policy violations",
                kind, namespace, name
            );
        }
        doc.violations.extend(violations);

        let (stored, created) =
            resource_repo::upsert(&self.db, fabric_id, kind, &namespace, &name, &fields)?;
        Ok(Processed::Stored(stored, created))
    }

    /// Keeps incoming content as `desired_spec` next to the GUI edits and
    /// records the conflict. The GUI-visible spec is not touched.
    fn hold_back(
        &self,
        record: &ResourceRecord,
        incoming: &Value,
        source: &str,
        remote_sha: Option<String>,
    ) -> Result<ConflictInfo, IngestError> {
        resource_repo::set_desired_spec(&self.db, record.id, incoming, Some(source))?;
        let updated = resource_repo::append_external_modification(
            &self.db,
            record.id,
            &ExternalModification {
                detected_at: Utc::now(),
                source: INTAKE_SOURCE.to_string(),
                description: format!("new content ingested from {}", source),
                path: Some(source.to_string()),
                remote_sha: remote_sha.clone(),
            },
        )?;
        let info = ConflictInfo::concurrent(record, source, remote_sha.as_deref());
        let details = info.to_details(updated.conflict_details.as_ref());
        resource_repo::record_conflict(&self.db, record.id, &details)?;
        Ok(info)
    }

    fn step_archive(
        &self,
        layout: &DirectoryLayout,
        ctx: &mut FileContext,
        summary: &mut StageSummary,
    ) -> FileOutcome {
        let now = Utc::now();
        let succeeded = ctx.succeeded();
        let archived = if succeeded {
            archive::archive_processed(&ctx.source_path, &layout.processed_dir(), now)
        } else {
            archive::archive_errored(ctx, &layout.errors_dir(), now)
        };

        let mut errors = ctx.errors();
        let stage = match archived {
            Ok(path) => {
                summary.succeed();
                ctx.archive_path = Some(path);
                if succeeded {
                    FileStage::Archived
                } else {
                    FileStage::Errored
                }
            }
            Err(e) => {
                warn!("Failed to archive {}: {}", ctx.relative_path, e);
                summary.fail(format!("{}: {}", ctx.relative_path, e));
                errors.push(format!("archive: {}", e));
                if succeeded {
                    FileStage::Processed
                } else {
                    FileStage::Errored
                }
            }
        };

        FileOutcome {
            source: ctx.relative_path.clone(),
            stage,
            archived_to: ctx
                .archive_path
                .as_deref()
                .and_then(|p| layout.relative_of(p)),
            resources: ctx.ingested.clone(),
            errors,
        }
    }
}

/// Lists manifests directly under `raw/`, then `raw/pending/`, each sorted by name.
fn discover(
    layout: &DirectoryLayout,
    summary: &mut StageSummary,
) -> Result<Vec<FileContext>, IngestError> {
    let _step = info_span!("discover").entered();
    let mut files = Vec::new();

    for dir in [layout.raw_dir(), layout.pending_dir()] {
        if !dir.is_dir() {
            summary.warn(format!("{} does not exist", dir.display()));
            continue;
        }
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| IngestError::Discovery {
                path: dir.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let Some(relative) = layout.relative_of(&path) else {
                continue;
            };
            if !is_manifest_file(&relative) {
                continue;
            }
            summary.succeed();
            files.push(FileContext::new(path, relative, None));
        }
    }

    debug!("Discovered {} raw files", files.len());
    Ok(files)
}

/// Staging name for a pulled file: repository path with `/` replaced by `__`.
pub(crate) fn staged_file_name(repo_path: &str) -> String {
    repo_path.trim_start_matches('/').replace('/', "__")
}

/// Writes pulled content into `raw/pending/` for ingestion.
pub(crate) fn stage_remote_file(
    layout: &DirectoryLayout,
    repo_path: &str,
    content: &str,
) -> Result<PathBuf, GitOpsError> {
    let dir = layout.pending_dir();
    std::fs::create_dir_all(&dir).map_err(|e| GitOpsError::io(&dir, e))?;
    let path = dir.join(staged_file_name(repo_path));
    std::fs::write(&path, content).map_err(|e| GitOpsError::io(&path, e))?;
    Ok(path)
}

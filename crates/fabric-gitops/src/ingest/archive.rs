use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::context::FileContext;
use super::IngestError;
use crate::gitops::validation::PolicyViolation;

/// Moves `src` to `dst`, renaming when possible and copying across devices.
pub(crate) fn move_file(src: &Path, dst: &Path) -> Result<(), IngestError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| IngestError::Archive {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| IngestError::Archive {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

fn ensure_directory(path: &Path) -> Result<(), IngestError> {
    std::fs::create_dir_all(path).map_err(|e| IngestError::Archive {
        from: path.to_path_buf(),
        to: path.to_path_buf(),
        source: e,
    })
}

/// First free `<base><suffix>` in `directory`, counting up from `_2` on collision.
fn free_path(directory: &Path, base: &str, suffix: &str) -> Result<PathBuf, IngestError> {
    let path = directory.join(format!("{}{}", base, suffix));
    if std::fs::symlink_metadata(&path).is_err() {
        return Ok(path);
    }
    for counter in 2..=1000 {
        let candidate = directory.join(format!("{}_{}{}", base, counter, suffix));
        if std::fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }
    Err(IngestError::ArchiveNameExhausted(path))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("manifest")
        .to_string()
}

/// Moves a fully ingested file to `processed/<stem>_<YYYYMMDD_HHMMSS>.yaml`.
pub(crate) fn archive_processed(
    source: &Path,
    processed_dir: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, IngestError> {
    ensure_directory(processed_dir)?;
    let base = format!("{}_{}", file_stem(source), now.format("%Y%m%d_%H%M%S"));
    let target = free_path(processed_dir, &base, ".yaml")?;
    move_file(source, &target)?;
    Ok(target)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentFailure {
    index: usize,
    name: String,
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<PolicyViolation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorSidecar<'a> {
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_path: Option<&'a str>,
    failed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_error: Option<&'a str>,
    documents: Vec<DocumentFailure>,
    /// Records written from the documents that did pass.
    ingested: &'a [String],
    warnings: &'a [String],
}

/// Moves a failed file to `errors/<stem>.yaml` and writes `errors/<stem>_error.json`.
///
/// Returns the archived file path.
pub(crate) fn archive_errored(
    ctx: &FileContext,
    errors_dir: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, IngestError> {
    ensure_directory(errors_dir)?;
    let target = free_path(errors_dir, &file_stem(&ctx.source_path), ".yaml")?;
    let sidecar_base = file_stem(&target);

    let sidecar = ErrorSidecar {
        source: &ctx.relative_path,
        remote_path: ctx.origin.as_ref().map(|o| o.path.as_str()),
        failed_at: now,
        file_error: ctx.error.as_deref(),
        documents: ctx
            .documents
            .iter()
            .filter_map(|d| {
                d.error.as_ref().map(|error| DocumentFailure {
                    index: d.index,
                    name: d.name().to_string(),
                    error: error.clone(),
                    violations: d.violations.clone(),
                })
            })
            .collect(),
        ingested: &ctx.ingested,
        warnings: &ctx.warnings,
    };

    let sidecar_path = errors_dir.join(format!("{}_error.json", sidecar_base));
    let json = serde_json::to_string_pretty(&sidecar)
        .map_err(|e| crate::gitops::GitOpsError::Serialize(e.to_string()))?;
    std::fs::write(&sidecar_path, json).map_err(|e| IngestError::Archive {
        from: ctx.source_path.clone(),
        to: sidecar_path.clone(),
        source: e,
    })?;

    move_file(&ctx.source_path, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_processed_name_carries_timestamp() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("vpcs.yml");
        std::fs::write(&source, "kind: VPC\n").unwrap();
        let processed = temp.path().join("processed");

        let archived = archive_processed(&source, &processed, at()).unwrap();

        assert_eq!(archived, processed.join("vpcs_20260314_092653.yaml"));
        assert!(!source.exists());
        assert_eq!(std::fs::read_to_string(&archived).unwrap(), "kind: VPC\n");
    }

    #[test]
    fn test_processed_collision_gets_counter() {
        let temp = TempDir::new().unwrap();
        let processed = temp.path().join("processed");
        std::fs::create_dir_all(&processed).unwrap();
        std::fs::write(processed.join("vpcs_20260314_092653.yaml"), "old").unwrap();
        let source = temp.path().join("vpcs.yaml");
        std::fs::write(&source, "new").unwrap();

        let archived = archive_processed(&source, &processed, at()).unwrap();

        assert_eq!(archived, processed.join("vpcs_20260314_092653_2.yaml"));
        assert_eq!(
            std::fs::read_to_string(processed.join("vpcs_20260314_092653.yaml")).unwrap(),
            "old"
        );
    }

    #[test]
    fn test_errored_file_gets_sidecar() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("broken.yaml");
        std::fs::write(&source, "kind: [").unwrap();
        let errors = temp.path().join("errors");

        let mut ctx = FileContext::new(source.clone(), "raw/broken.yaml".into(), None);
        ctx.error = Some("validation: invalid YAML".into());

        let archived = archive_errored(&ctx, &errors, at()).unwrap();

        assert_eq!(archived, errors.join("broken.yaml"));
        assert!(!source.exists());
        let raw = std::fs::read_to_string(errors.join("broken_error.json")).unwrap();
        let sidecar: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(sidecar["source"], "raw/broken.yaml");
        assert_eq!(sidecar["fileError"], "validation: invalid YAML");
    }

    #[test]
    fn test_errored_collision_keeps_both() {
        let temp = TempDir::new().unwrap();
        let errors = temp.path().join("errors");
        std::fs::create_dir_all(&errors).unwrap();
        std::fs::write(errors.join("broken.yaml"), "first").unwrap();
        let source = temp.path().join("broken.yaml");
        std::fs::write(&source, "second").unwrap();

        let mut ctx = FileContext::new(source, "raw/broken.yaml".into(), None);
        ctx.error = Some("validation: bad".into());
        let archived = archive_errored(&ctx, &errors, at()).unwrap();

        assert_eq!(archived, errors.join("broken_2.yaml"));
        assert!(errors.join("broken_2_error.json").exists());
        assert_eq!(std::fs::read_to_string(errors.join("broken.yaml")).unwrap(), "first");
    }
}

use serde::Serialize;

use crate::gitops::conflict::ConflictInfo;

/// Counters and messages of one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub processed: u32,
    pub success: u32,
    pub failed: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StageSummary {
    pub fn succeed(&mut self) {
        self.processed += 1;
        self.success += 1;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.processed += 1;
        self.failed += 1;
        self.errors.push(error.into());
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Where a file ended up in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Discovered,
    Validated,
    Classified,
    Processed,
    Archived,
    Errored,
}

/// Per-file result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    /// Path relative to the fabric root.
    pub source: String,
    pub stage: FileStage,
    /// Layout-relative archive path, once archived.
    pub archived_to: Option<String>,
    /// `kind/namespace/name` of every record written from this file.
    pub resources: Vec<String>,
    pub errors: Vec<String>,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    /// True only if every discovered file went through without error.
    pub success: bool,
    pub message: String,
    pub discovery: StageSummary,
    pub validation: StageSummary,
    pub classification: StageSummary,
    pub processing: StageSummary,
    pub archive: StageSummary,
    pub files: Vec<FileOutcome>,
    pub resources_created: u32,
    pub resources_updated: u32,
    /// IDs of the records written by this run.
    pub touched_resource_ids: Vec<i64>,
    /// Incoming documents held back because the record had unsynced GUI edits.
    pub conflicts: Vec<ConflictInfo>,
    /// `total_success / total_processed` over all stages; 1.0 for an empty run.
    pub success_rate: f64,
    pub operation_id: Option<String>,
}

impl IngestionResult {
    fn stages(&self) -> [&StageSummary; 5] {
        [
            &self.discovery,
            &self.validation,
            &self.classification,
            &self.processing,
            &self.archive,
        ]
    }

    /// A run that did not get past setup.
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        let mut result = Self {
            message: error.clone(),
            ..Default::default()
        };
        result.discovery.errors.push(error);
        result
    }

    /// Fills `success`, `success_rate` and `message` from the counters.
    pub fn finalize(&mut self) {
        let (processed, succeeded) = self
            .stages()
            .iter()
            .fold((0u32, 0u32), |(p, s), stage| (p + stage.processed, s + stage.success));
        self.success_rate = if processed == 0 {
            1.0
        } else {
            f64::from(succeeded) / f64::from(processed)
        };
        let failed_files = self.files.iter().filter(|f| !f.succeeded()).count();
        self.success = failed_files == 0 && self.stages().iter().all(|s| s.failed == 0);
        self.message = if self.files.is_empty() {
            "No raw files to ingest".to_string()
        } else {
            format!(
                "Ingested {} files: {} resources created, {} updated, {} files failed",
                self.files.len(),
                self.resources_created,
                self.resources_updated,
                failed_files
            )
        };
    }

    pub fn errors(&self) -> Vec<String> {
        self.stages()
            .iter()
            .flat_map(|s| s.errors.iter().cloned())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.stages()
            .iter()
            .flat_map(|s| s.warnings.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_run_is_successful() {
        let mut result = IngestionResult::default();
        result.finalize();
        assert!(result.success);
        assert_eq!(result.success_rate, 1.0);
    }

    #[test]
    fn test_partial_failure_is_flagged() {
        let mut result = IngestionResult::default();
        result.discovery.succeed();
        result.discovery.succeed();
        result.validation.succeed();
        result.validation.fail("b.yaml: metadata.name is required");
        result.files.push(FileOutcome {
            source: "raw/a.yaml".into(),
            stage: FileStage::Archived,
            archived_to: None,
            resources: vec![],
            errors: vec![],
        });
        result.finalize();
        assert!(!result.success);
        assert_eq!(result.success_rate, 0.75);
        assert_eq!(result.errors().len(), 1);
    }
}

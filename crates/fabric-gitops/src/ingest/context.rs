use std::path::PathBuf;

use serde_json::Value;

use crate::gitops::resource::ResourceKind;
use crate::gitops::validation::PolicyViolation;

/// Where a staged file came from in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOrigin {
    /// Repository-relative path.
    pub path: String,
    /// The same path relative to the fabric's directory.
    pub relative: String,
    /// Blob SHA the content was read at.
    pub sha: String,
}

impl RemoteOrigin {
    /// Blob SHA to remember for a record written to `managed_path`.
    ///
    /// Only the managed file's own blob counts; an intake file's blob
    /// says nothing about what the managed file holds in the repository.
    pub fn sha_for(&self, managed_path: &str) -> Option<String> {
        (self.relative == managed_path).then(|| self.sha.clone())
    }
}

/// One document of a file as it moves through the stages.
#[derive(Debug, Clone)]
pub(crate) struct DocumentContext {
    pub index: usize,
    pub document: Value,
    // Validation result
    pub violations: Vec<PolicyViolation>,
    // Classification result
    pub kind: Option<ResourceKind>,
    pub target_path: Option<String>,
    // Set once the document failed a stage
    pub error: Option<String>,
}

impl DocumentContext {
    pub fn new(index: usize, document: Value) -> Self {
        Self {
            index,
            document,
            violations: Vec::new(),
            kind: None,
            target_path: None,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        self.document
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
    }

    pub fn is_live(&self) -> bool {
        self.error.is_none()
    }

    pub fn fail(&mut self, stage: &str, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(format!("{}: {}", stage, message.into()));
        }
    }
}

/// Per-file pipeline state.
#[derive(Debug)]
pub(crate) struct FileContext {
    pub source_path: PathBuf,
    /// Layout-relative, `/`-separated.
    pub relative_path: String,
    pub origin: Option<RemoteOrigin>,
    pub documents: Vec<DocumentContext>,
    /// File-level failure (unreadable, unparsable).
    pub error: Option<String>,
    pub warnings: Vec<String>,
    /// Identities of the records written from this file.
    pub ingested: Vec<String>,
    pub archive_path: Option<PathBuf>,
}

impl FileContext {
    pub fn new(source_path: PathBuf, relative_path: String, origin: Option<RemoteOrigin>) -> Self {
        Self {
            source_path,
            relative_path,
            origin,
            documents: Vec::new(),
            error: None,
            warnings: Vec::new(),
            ingested: Vec::new(),
            archive_path: None,
        }
    }

    /// Whether every stage went through for the whole file.
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.documents.iter().all(DocumentContext::is_live)
    }

    pub fn errors(&self) -> Vec<String> {
        self.error
            .iter()
            .cloned()
            .chain(self.documents.iter().filter_map(|d| {
                d.error
                    .as_ref()
                    .map(|e| format!("document {} ({}): {}", d.index, d.name(), e))
            }))
            .collect()
    }
}

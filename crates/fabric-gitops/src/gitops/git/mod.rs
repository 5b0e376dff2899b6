//! Git host access for GitOps sync.
//!
//! [`GitProvider`] is the seam the orchestrator talks to; [`GitHubClient`]
//! implements it over the host's REST content API.

pub mod client;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use secrecy::SecretString;

pub use client::GitHubClient;
pub use types::{CommitDiff, RemoteFile, RepoRef, WriteResult};

use crate::config::GitConfig;
use crate::db::{repository_repo, Database};
use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::model::{Fabric, GitRepositoryBinding};
use crate::secrets::{self, TokenEncryptor};

/// Remote repository operations. Paths are repository-relative.
///
/// Writes use optimistic concurrency: updates and deletes carry the blob SHA
/// the caller last saw, and a stale SHA fails with [`GitOpsError::Conflict`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Reads a file. A missing file is `Ok(None)`.
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>>;

    /// Creates a file. Fails with [`GitOpsError::AlreadyExists`] if it is present.
    async fn create_file(&self, path: &str, content: &str, message: &str) -> Result<WriteResult>;

    async fn update_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_sha: &str,
    ) -> Result<WriteResult>;

    /// Deletes a file and returns the commit SHA.
    async fn delete_file(&self, path: &str, expected_sha: &str, message: &str) -> Result<String>;

    /// SHA of the head commit of the working branch.
    async fn get_latest_commit(&self) -> Result<String>;

    /// Files changed between two commits, restricted to `path_prefix`.
    async fn diff_commits(&self, base: &str, head: &str, path_prefix: &str) -> Result<CommitDiff>;

    /// All file paths under `path_prefix` at the head of the working branch.
    async fn list_files(&self, path_prefix: &str) -> Result<Vec<String>>;
}

/// Finds the provider for a fabric's repository binding.
///
/// `Ok(None)` means the fabric has no binding and works on local files only.
pub trait ProviderResolver: Send + Sync {
    fn resolve(&self, fabric: &Fabric) -> Result<Option<Arc<dyn GitProvider>>>;
}

/// Builds [`GitHubClient`]s from stored bindings.
///
/// Binding credentials are decrypted with the [`TokenEncryptor`]; bindings
/// without credentials fall back to the token configured in [`GitConfig`].
pub struct GitProviderFactory {
    db: Database,
    config: GitConfig,
    encryptor: Option<Arc<TokenEncryptor>>,
}

impl GitProviderFactory {
    pub fn new(db: Database, config: GitConfig, encryptor: Option<Arc<TokenEncryptor>>) -> Self {
        Self {
            db,
            config,
            encryptor,
        }
    }

    /// Resolves the token for a binding.
    fn token_for(&self, binding: &GitRepositoryBinding) -> Result<SecretString> {
        if let Some(ciphertext) = binding
            .encrypted_credentials
            .as_deref()
            .filter(|c| !c.is_empty())
        {
            let encryptor = self.encryptor.as_ref().ok_or_else(|| {
                GitOpsError::Configuration(format!(
                    "credentials for {} are encrypted but {} is not set",
                    binding.url,
                    secrets::TOKEN_KEY_ENV_VAR
                ))
            })?;
            return encryptor
                .decrypt(ciphertext)
                .map_err(|e| GitOpsError::Configuration(e.to_string()));
        }

        secrets::fallback_git_token(&self.config)
            .map_err(|e| GitOpsError::Configuration(e.to_string()))?
            .ok_or_else(|| {
                GitOpsError::Configuration(format!("no credentials for repository {}", binding.url))
            })
    }

    /// Builds a client for a binding.
    pub fn client_for(&self, binding: &GitRepositoryBinding) -> Result<GitHubClient> {
        let repo = RepoRef::parse(&binding.url)?;
        let token = self.token_for(binding)?;
        GitHubClient::new(
            &self.config,
            repo,
            binding.effective_branch().to_string(),
            token,
        )
    }
}

impl ProviderResolver for GitProviderFactory {
    fn resolve(&self, fabric: &Fabric) -> Result<Option<Arc<dyn GitProvider>>> {
        let Some(repository_id) = fabric.git_repository_id else {
            return Ok(None);
        };
        let binding = repository_repo::get(&self.db, repository_id)?.ok_or_else(|| {
            GitOpsError::Configuration(format!(
                "fabric '{}' references missing repository {}",
                fabric.name, repository_id
            ))
        })?;
        let client = self.client_for(&binding)?;
        Ok(Some(Arc::new(client)))
    }
}

//! Pure data types for Git host operations.

use serde::{Deserialize, Serialize};

use crate::gitops::error::{GitOpsError, Result};

/// A file read from the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Repository-relative path.
    pub path: String,
    /// Decoded UTF-8 content.
    pub content: String,
    /// Blob SHA, used as the optimistic-concurrency token for updates and deletes.
    pub sha: String,
}

/// Result of a create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub commit_sha: String,
    /// Blob SHA of the written content.
    pub content_sha: String,
}

/// Files that differ between two commits, split by change type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitDiff {
    pub changed: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
}

impl CommitDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.deleted.is_empty()
    }

    pub fn total(&self) -> usize {
        self.changed.len() + self.added.len() + self.deleted.len()
    }

    /// Files whose current content has to be fetched.
    pub fn upserted(&self) -> impl Iterator<Item = &String> {
        self.changed.iter().chain(self.added.iter())
    }

    /// Sorts each list and drops duplicates.
    pub fn normalize(&mut self) {
        for list in [&mut self.changed, &mut self.added, &mut self.deleted] {
            list.sort();
            list.dedup();
        }
    }
}

/// Owner and name of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parses `https://host/owner/repo(.git)`, `ssh://git@host/owner/repo.git`
    /// and `git@host:owner/repo.git`.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let path = if let Some(rest) = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .or_else(|| url.strip_prefix("ssh://"))
        {
            rest.split_once('/').map(|(_, path)| path)
        } else if let Some(rest) = url.strip_prefix("git@") {
            rest.split_once(':').map(|(_, path)| path)
        } else {
            None
        };

        let path = path
            .map(|p| p.trim_end_matches('/'))
            .map(|p| p.strip_suffix(".git").unwrap_or(p))
            .ok_or_else(|| {
                GitOpsError::Configuration(format!("unsupported repository URL: {}", url))
            })?;

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        match (segments.next(), segments.next(), segments.next()) {
            (Some(owner), Some(name), None) => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(GitOpsError::Configuration(format!(
                "repository URL must name owner and repository: {}",
                url
            ))),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_ref_parse_forms() {
        let expected = RepoRef {
            owner: "acme".into(),
            name: "fabric-config".into(),
        };
        for url in [
            "https://github.com/acme/fabric-config",
            "https://github.com/acme/fabric-config.git",
            "https://github.com/acme/fabric-config/",
            "git@github.com:acme/fabric-config.git",
            "ssh://git@github.com/acme/fabric-config.git",
        ] {
            assert_eq!(RepoRef::parse(url).unwrap(), expected, "{}", url);
        }
    }

    #[test]
    fn test_repo_ref_rejects_incomplete_urls() {
        assert!(RepoRef::parse("https://github.com/acme").is_err());
        assert!(RepoRef::parse("https://github.com/acme/repo/tree/main").is_err());
        assert!(RepoRef::parse("/local/path").is_err());
    }

    #[test]
    fn test_commit_diff_normalize() {
        let mut diff = CommitDiff {
            changed: vec!["b".into(), "a".into(), "a".into()],
            added: vec![],
            deleted: vec!["c".into()],
        };
        diff.normalize();
        assert_eq!(diff.changed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(diff.total(), 3);
        assert_eq!(diff.upserted().count(), 2);
        assert!(!diff.is_empty());
    }
}

//! In-memory Git host.
//!
//! Every write is a commit holding a full snapshot of the tree, so diffs
//! between any two commits are exact. Blob SHAs are derived from content,
//! and updates or deletes with a stale SHA fail like the real host does.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use fabric_gitops::gitops::codec::content_hash;
use fabric_gitops::gitops::{CommitDiff, GitOpsError, GitProvider, RemoteFile, WriteResult};

/// path -> (content, blob sha)
type Tree = BTreeMap<String, (String, String)>;

struct Commit {
    sha: String,
    tree: Tree,
}

/// Number of calls per provider operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_file: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub latest_commit: usize,
    pub diff: usize,
    pub list: usize,
}

impl CallCounts {
    pub fn writes(&self) -> usize {
        self.create + self.update + self.delete
    }
}

struct State {
    commits: Vec<Commit>,
    calls: CallCounts,
}

impl State {
    fn head(&self) -> &Commit {
        // The repository is created with an initial commit.
        &self.commits[self.commits.len() - 1]
    }

    fn commit(&mut self, tree: Tree) -> String {
        let sha = format!("{:040x}", self.commits.len() + 1);
        self.commits.push(Commit {
            sha: sha.clone(),
            tree,
        });
        sha
    }

    fn tree_at(&self, sha: &str) -> Option<&Tree> {
        self.commits.iter().find(|c| c.sha == sha).map(|c| &c.tree)
    }
}

pub fn blob_sha(content: &str) -> String {
    content_hash(&format!("blob\0{}", content))[..40].to_string()
}

type WriteHook = Box<dyn Fn(&str) + Send + Sync>;

pub struct FakeGitProvider {
    state: Mutex<State>,
    on_write: Mutex<Option<WriteHook>>,
}

impl Default for FakeGitProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGitProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                commits: vec![Commit {
                    sha: format!("{:040x}", 0),
                    tree: Tree::new(),
                }],
                calls: CallCounts::default(),
            }),
            on_write: Mutex::new(None),
        }
    }

    /// Calls `hook` with the path before every create or update.
    pub fn on_write(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_write.lock().unwrap() = Some(Box::new(hook));
    }

    fn before_write(&self, path: &str) {
        if let Some(hook) = self.on_write.lock().unwrap().as_ref() {
            hook(path);
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Commits a file as an outside contributor would. Returns the commit.
    pub fn put(&self, path: &str, content: &str) -> String {
        let mut state = self.state();
        let mut tree = state.head().tree.clone();
        tree.insert(path.to_string(), (content.to_string(), blob_sha(content)));
        state.commit(tree)
    }

    /// Removes a file as an outside contributor would. Returns the commit.
    pub fn remove(&self, path: &str) -> String {
        let mut state = self.state();
        let mut tree = state.head().tree.clone();
        tree.remove(path);
        state.commit(tree)
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.state().head().tree.get(path).map(|(c, _)| c.clone())
    }

    pub fn blob(&self, path: &str) -> Option<String> {
        self.state().head().tree.get(path).map(|(_, s)| s.clone())
    }

    pub fn head(&self) -> String {
        self.state().head().sha.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.state().commits.len()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls.clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state().head().tree.keys().cloned().collect()
    }
}

#[async_trait]
impl GitProvider for FakeGitProvider {
    async fn get_file(&self, path: &str) -> fabric_gitops::gitops::Result<Option<RemoteFile>> {
        let mut state = self.state();
        state.calls.get_file += 1;
        Ok(state.head().tree.get(path).map(|(content, sha)| RemoteFile {
            path: path.to_string(),
            content: content.clone(),
            sha: sha.clone(),
        }))
    }

    async fn create_file(
        &self,
        path: &str,
        content: &str,
        _message: &str,
    ) -> fabric_gitops::gitops::Result<WriteResult> {
        self.before_write(path);
        let mut state = self.state();
        state.calls.create += 1;
        let mut tree = state.head().tree.clone();
        if tree.contains_key(path) {
            return Err(GitOpsError::AlreadyExists(path.to_string()));
        }
        let sha = blob_sha(content);
        tree.insert(path.to_string(), (content.to_string(), sha.clone()));
        Ok(WriteResult {
            commit_sha: state.commit(tree),
            content_sha: sha,
        })
    }

    async fn update_file(
        &self,
        path: &str,
        content: &str,
        _message: &str,
        expected_sha: &str,
    ) -> fabric_gitops::gitops::Result<WriteResult> {
        self.before_write(path);
        let mut state = self.state();
        state.calls.update += 1;
        let mut tree = state.head().tree.clone();
        match tree.get(path) {
            None => return Err(GitOpsError::NotFound(path.to_string())),
            Some((_, sha)) if sha != expected_sha => {
                return Err(GitOpsError::Conflict {
                    path: path.to_string(),
                    message: format!("expected blob {}, found {}", expected_sha, sha),
                })
            }
            Some(_) => {}
        }
        let sha = blob_sha(content);
        tree.insert(path.to_string(), (content.to_string(), sha.clone()));
        Ok(WriteResult {
            commit_sha: state.commit(tree),
            content_sha: sha,
        })
    }

    async fn delete_file(
        &self,
        path: &str,
        expected_sha: &str,
        _message: &str,
    ) -> fabric_gitops::gitops::Result<String> {
        let mut state = self.state();
        state.calls.delete += 1;
        let mut tree = state.head().tree.clone();
        match tree.remove(path) {
            None => Err(GitOpsError::NotFound(path.to_string())),
            Some((_, sha)) if sha != expected_sha => Err(GitOpsError::Conflict {
                path: path.to_string(),
                message: format!("expected blob {}, found {}", expected_sha, sha),
            }),
            Some(_) => Ok(state.commit(tree)),
        }
    }

    async fn get_latest_commit(&self) -> fabric_gitops::gitops::Result<String> {
        let mut state = self.state();
        state.calls.latest_commit += 1;
        Ok(state.head().sha.clone())
    }

    async fn diff_commits(
        &self,
        base: &str,
        head: &str,
        path_prefix: &str,
    ) -> fabric_gitops::gitops::Result<CommitDiff> {
        let mut state = self.state();
        state.calls.diff += 1;
        let before = state
            .tree_at(base)
            .ok_or_else(|| GitOpsError::NotFound(format!("commit {}", base)))?;
        let after = state
            .tree_at(head)
            .ok_or_else(|| GitOpsError::NotFound(format!("commit {}", head)))?;

        let mut diff = CommitDiff::default();
        for (path, (_, sha)) in after.iter().filter(|(p, _)| p.starts_with(path_prefix)) {
            match before.get(path) {
                None => diff.added.push(path.clone()),
                Some((_, old)) if old != sha => diff.changed.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in before.keys().filter(|p| p.starts_with(path_prefix)) {
            if !after.contains_key(path) {
                diff.deleted.push(path.clone());
            }
        }
        Ok(diff)
    }

    async fn list_files(&self, path_prefix: &str) -> fabric_gitops::gitops::Result<Vec<String>> {
        let mut state = self.state();
        state.calls.list += 1;
        Ok(state
            .head()
            .tree
            .keys()
            .filter(|p| p.starts_with(path_prefix))
            .cloned()
            .collect())
    }
}

//! GitHub-style REST client for repository contents.
//!
//! Content travels base64 encoded; callers only see UTF-8 strings.
//! Transient failures (connect errors, timeouts, 429, 5xx) are retried with
//! exponential backoff. Every other status is surfaced immediately.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::types::{CommitDiff, RemoteFile, RepoRef, WriteResult};
use super::GitProvider;
use crate::config::{CommitAuthor, GitConfig};
use crate::gitops::error::{classify_http_status, GitOpsError, Result};

const USER_AGENT: &str = concat!("fabric-gitops/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    repo: RepoRef,
    branch: String,
    token: SecretString,
    max_retries: u32,
    retry_base_delay: Duration,
    timeout_secs: u64,
    committer: Option<CommitAuthor>,
}

impl GitHubClient {
    pub fn new(
        config: &GitConfig,
        repo: RepoRef,
        branch: String,
        token: SecretString,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                GitOpsError::Configuration(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            repo,
            branch,
            token,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            timeout_secs: config.request_timeout_secs,
            committer: config.commit_author.clone(),
        })
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            encode_segment(&self.repo.owner),
            encode_segment(&self.repo.name),
            suffix
        )
    }

    fn contents_url(&self, path: &str) -> String {
        self.repo_url(&format!("contents/{}", encode_path(path)))
    }

    fn write_body(&self, message: &str, content: Option<&str>, sha: Option<&str>) -> Value {
        let mut body = json!({
            "message": message,
            "branch": self.branch,
        });
        if let Some(content) = content {
            body["content"] = Value::String(STANDARD.encode(content.as_bytes()));
        }
        if let Some(sha) = sha {
            body["sha"] = Value::String(sha.to_string());
        }
        if let Some(author) = &self.committer {
            body["committer"] = json!({ "name": author.name, "email": author.email });
        }
        body
    }

    /// Sends a request, retrying transient failures.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        path: &str,
    ) -> Result<Value> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                log::warn!(
                    "Retrying {} {} (attempt {}/{}) after {:?}",
                    method,
                    path,
                    attempt,
                    self.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.send_once(method.clone(), url, body, path).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    log::warn!("Git host request for {} failed: {}", path, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| GitOpsError::TransientNetwork("no attempts made".into())))
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        path: &str,
    ) -> Result<Value> {
        log::debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(classify_http_status(status.as_u16(), path, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| GitOpsError::Http {
            status: status.as_u16(),
            message: format!("invalid JSON response: {}", e),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> GitOpsError {
        if e.is_timeout() {
            GitOpsError::Timeout(self.timeout_secs)
        } else if e.is_connect() || e.is_request() {
            GitOpsError::TransientNetwork(e.to_string())
        } else {
            GitOpsError::Http {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl GitProvider for GitHubClient {
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>> {
        let url = format!("{}?ref={}", self.contents_url(path), encode_segment(&self.branch));
        let value = match self.send(Method::GET, &url, None, path).await {
            Ok(value) => value,
            Err(GitOpsError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if value.is_array() {
            return Err(GitOpsError::Validation(format!("'{}' is a directory", path)));
        }
        let sha = str_field(&value, "sha", path)?;
        let encoded = value.get("content").and_then(Value::as_str).unwrap_or("");
        let content = decode_content(encoded, path)?;
        Ok(Some(RemoteFile {
            path: path.to_string(),
            content,
            sha,
        }))
    }

    async fn create_file(&self, path: &str, content: &str, message: &str) -> Result<WriteResult> {
        let body = self.write_body(message, Some(content), None);
        match self.send(Method::PUT, &self.contents_url(path), Some(&body), path).await {
            Ok(value) => parse_write_result(&value, path),
            // The host answers 422 when a create omits the SHA of an existing file.
            Err(GitOpsError::Conflict { .. }) => Err(GitOpsError::AlreadyExists(path.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn update_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_sha: &str,
    ) -> Result<WriteResult> {
        let body = self.write_body(message, Some(content), Some(expected_sha));
        let value = self
            .send(Method::PUT, &self.contents_url(path), Some(&body), path)
            .await?;
        parse_write_result(&value, path)
    }

    async fn delete_file(&self, path: &str, expected_sha: &str, message: &str) -> Result<String> {
        let body = self.write_body(message, None, Some(expected_sha));
        let value = self
            .send(Method::DELETE, &self.contents_url(path), Some(&body), path)
            .await?;
        value
            .get("commit")
            .map(|commit| str_field(commit, "sha", path))
            .unwrap_or_else(|| Err(missing_field("commit", path)))
    }

    async fn get_latest_commit(&self) -> Result<String> {
        let url = self.repo_url(&format!("commits/{}", encode_segment(&self.branch)));
        let value = self.send(Method::GET, &url, None, &self.branch).await?;
        str_field(&value, "sha", &self.branch)
    }

    async fn diff_commits(&self, base: &str, head: &str, path_prefix: &str) -> Result<CommitDiff> {
        let range = format!("{}...{}", base, head);
        let url = self.repo_url(&format!("compare/{}", encode_segment(&range)));
        let value = self.send(Method::GET, &url, None, &range).await?;
        let files = value
            .get("files")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Ok(categorize_compare_files(files, path_prefix))
    }

    async fn list_files(&self, path_prefix: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}?recursive=1",
            self.repo_url(&format!("git/trees/{}", encode_segment(&self.branch)))
        );
        let value = self.send(Method::GET, &url, None, path_prefix).await?;
        if value.get("truncated").and_then(Value::as_bool) == Some(true) {
            log::warn!("Tree listing for {} was truncated by the Git host", self.repo);
        }
        let tree = value
            .get("tree")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Ok(filter_tree(tree, path_prefix))
    }
}

fn missing_field(field: &str, path: &str) -> GitOpsError {
    GitOpsError::Http {
        status: 200,
        message: format!("response for '{}' has no '{}'", path, field),
    }
}

fn str_field(value: &Value, field: &str, path: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing_field(field, path))
}

fn parse_write_result(value: &Value, path: &str) -> Result<WriteResult> {
    let commit_sha = value
        .get("commit")
        .ok_or_else(|| missing_field("commit", path))
        .and_then(|c| str_field(c, "sha", path))?;
    let content_sha = value
        .get("content")
        .ok_or_else(|| missing_field("content", path))
        .and_then(|c| str_field(c, "sha", path))?;
    Ok(WriteResult {
        commit_sha,
        content_sha,
    })
}

/// Decodes base64 content as served by the host (wrapped at 60 columns).
fn decode_content(raw: &str, path: &str) -> Result<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|e| GitOpsError::Parse {
        path: path.into(),
        message: format!("invalid base64 content: {}", e),
    })?;
    String::from_utf8(bytes).map_err(|e| GitOpsError::Parse {
        path: path.into(),
        message: format!("content is not valid UTF-8: {}", e),
    })
}

fn under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn categorize_compare_files(files: &[Value], path_prefix: &str) -> CommitDiff {
    let mut diff = CommitDiff::default();
    for file in files {
        let Some(name) = file.get("filename").and_then(Value::as_str) else {
            continue;
        };
        let status = file.get("status").and_then(Value::as_str).unwrap_or("modified");
        match status {
            "added" | "copied" => {
                if under_prefix(name, path_prefix) {
                    diff.added.push(name.to_string());
                }
            }
            "removed" => {
                if under_prefix(name, path_prefix) {
                    diff.deleted.push(name.to_string());
                }
            }
            "renamed" => {
                if let Some(previous) = file.get("previous_filename").and_then(Value::as_str) {
                    if under_prefix(previous, path_prefix) {
                        diff.deleted.push(previous.to_string());
                    }
                }
                if under_prefix(name, path_prefix) {
                    diff.added.push(name.to_string());
                }
            }
            "unchanged" => {}
            _ => {
                if under_prefix(name, path_prefix) {
                    diff.changed.push(name.to_string());
                }
            }
        }
    }
    diff.normalize();
    diff
}

fn filter_tree(tree: &[Value], path_prefix: &str) -> Vec<String> {
    let mut paths: Vec<String> = tree
        .iter()
        .filter(|entry| entry.get("type").and_then(Value::as_str) == Some("blob"))
        .filter_map(|entry| entry.get("path").and_then(Value::as_str))
        .filter(|path| under_prefix(path, path_prefix))
        .map(str::to_string)
        .collect();
    paths.sort();
    paths
}

/// Percent-encodes one URL path segment.
fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn encode_path(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

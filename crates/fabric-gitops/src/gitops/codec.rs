//! Manifest codec: resource manifests to and from YAML documents.
//!
//! Encoding is deterministic: metadata maps are `BTreeMap`s and specs are
//! `serde_json::Value`s (sorted object keys), so the same manifest always
//! produces the same bytes and the same [`content_hash`].

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use super::error::{GitOpsError, Result};
use super::resource::Manifest;

/// The documents decoded from one YAML stream.
#[derive(Debug, Clone, Default)]
pub struct DecodedStream {
    /// Every mapping document, in stream order, as a generic value.
    pub documents: Vec<serde_json::Value>,
    /// Empty or non-mapping documents that were skipped.
    pub warnings: Vec<String>,
}

/// Encodes a manifest as a single YAML document.
pub fn encode(manifest: &Manifest) -> Result<String> {
    serde_yaml::to_string(manifest).map_err(|e| GitOpsError::Serialize(e.to_string()))
}

/// Decodes a (possibly multi-document) YAML stream into generic mapping documents.
///
/// Malformed YAML fails the whole stream with a parse error. Empty and
/// non-mapping documents are skipped with a warning.
pub fn decode(bytes: &[u8], path: &Path) -> Result<DecodedStream> {
    let text = std::str::from_utf8(bytes).map_err(|e| GitOpsError::Parse {
        path: path.to_path_buf(),
        message: format!("file is not valid UTF-8: {}", e),
    })?;

    let mut stream = DecodedStream::default();

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| GitOpsError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        match value {
            serde_yaml::Value::Null => {
                stream
                    .warnings
                    .push(format!("document {} is empty, skipped", index));
            }
            serde_yaml::Value::Mapping(_) => {
                let json = serde_json::to_value(&value).map_err(|e| GitOpsError::Parse {
                    path: path.to_path_buf(),
                    message: format!("document {} cannot be represented: {}", index, e),
                })?;
                stream.documents.push(json);
            }
            _ => {
                stream
                    .warnings
                    .push(format!("document {} is not a mapping, skipped", index));
            }
        }
    }

    if stream.documents.is_empty() && stream.warnings.is_empty() {
        stream.warnings.push("no YAML documents found".to_string());
    }

    Ok(stream)
}

/// Decodes a stream and converts each document into a [`Manifest`].
pub fn decode_manifests(bytes: &[u8], path: &Path) -> Result<Vec<Manifest>> {
    decode(bytes, path)?
        .documents
        .iter()
        .map(|doc| {
            Manifest::from_document(doc).map_err(|e| GitOpsError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// SHA-256 of the given content, lowercase hex.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Encodes a manifest and hashes the canonical bytes.
pub fn encode_with_hash(manifest: &Manifest) -> Result<(String, String)> {
    let yaml = encode(manifest)?;
    let hash = content_hash(&yaml);
    Ok((yaml, hash))
}

//! Structural and policy validation of decoded manifest documents.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use super::error::{GitOpsError, Result};
use super::resource::{ResourceKind, DEFAULT_NAMESPACE};

// DNS-1123 subdomain label form used for names and namespaces.
static RE_DNS_1123: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Maximum length of a DNS-1123 name.
pub const MAX_DNS_1123_LENGTH: usize = 253;

/// Spec keys whose string values are treated as credentials.
const SECRET_KEY_MARKERS: &[&str] = &["password", "secret", "token", "privatekey", "private_key"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    SecurityRisk,
    ComplianceViolation,
    ResourceLimit,
    NamingConvention,
    RequiredField,
    InvalidConfiguration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A single finding against a manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub violation_type: ViolationType,
    pub severity: Severity,
    /// Blocking findings keep a resource from leaving `pending`.
    pub blocking: bool,
    pub can_auto_fix: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl PolicyViolation {
    fn blocking(violation_type: ViolationType, field: &str, message: impl Into<String>) -> Self {
        Self {
            violation_type,
            severity: Severity::Error,
            blocking: true,
            can_auto_fix: false,
            message: message.into(),
            field: Some(field.to_string()),
            suggested_fix: None,
        }
    }

    fn advisory(violation_type: ViolationType, field: &str, message: impl Into<String>) -> Self {
        Self {
            violation_type,
            severity: Severity::Warning,
            blocking: false,
            can_auto_fix: false,
            message: message.into(),
            field: Some(field.to_string()),
            suggested_fix: None,
        }
    }

    fn with_fix(mut self, fix: impl Into<String>, auto: bool) -> Self {
        self.suggested_fix = Some(fix.into());
        self.can_auto_fix = auto;
        self
    }

    fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Returns true if any violation blocks.
pub fn has_blocking(violations: &[PolicyViolation]) -> bool {
    violations.iter().any(|v| v.blocking)
}

/// Checks the DNS-1123 naming rule (pattern and length).
pub fn is_dns_1123(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_DNS_1123_LENGTH && RE_DNS_1123.is_match(value)
}

/// Fabric-specific policy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Extra naming pattern names should follow (advisory).
    #[serde(default)]
    pub name_pattern: Option<String>,

    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,

    #[serde(default = "default_required_labels")]
    pub required_labels: Vec<String>,

    /// Kinds that must carry an explicit, non-default namespace.
    #[serde(default)]
    pub explicit_namespace_kinds: Vec<ResourceKind>,

    /// Maximum number of records per kind per fabric.
    #[serde(default)]
    pub quotas: BTreeMap<ResourceKind, usize>,

    #[serde(default = "default_true")]
    pub block_plaintext_secrets: bool,
}

fn default_max_name_length() -> usize {
    MAX_DNS_1123_LENGTH
}

fn default_required_labels() -> Vec<String> {
    vec!["environment".to_string(), "team".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            name_pattern: None,
            max_name_length: default_max_name_length(),
            required_labels: default_required_labels(),
            explicit_namespace_kinds: Vec::new(),
            quotas: BTreeMap::new(),
            block_plaintext_secrets: true,
        }
    }
}

/// Facts about the record store a document is checked against.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyContext {
    /// Records of the same kind already present in the fabric.
    pub existing_of_kind: usize,
    /// Whether the document would create a new record.
    pub is_new: bool,
}

/// Validates manifest documents against structural rules and fabric policies.
pub struct PolicyEngine {
    config: PolicyConfig,
    name_pattern: Option<Regex>,
}

impl PolicyEngine {
    /// Creates an engine, compiling the configured naming pattern.
    pub fn new(config: PolicyConfig) -> Result<Self> {
        let name_pattern = match config.name_pattern.as_deref() {
            Some(p) if !p.is_empty() => Some(Regex::new(p).map_err(|e| {
                GitOpsError::Configuration(format!("invalid policy namePattern '{}': {}", p, e))
            })?),
            _ => None,
        };
        Ok(Self {
            config,
            name_pattern,
        })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Runs every rule: structure, kind allow-list and domain policies.
    pub fn validate(&self, document: &Value, ctx: PolicyContext) -> Vec<PolicyViolation> {
        let mut violations = self.validate_structure(document);
        violations.extend(self.check_kind(document));
        violations.extend(self.evaluate_policies(document, ctx));
        violations
    }

    /// Structural rules. Every finding is blocking.
    ///
    /// Kind membership is not checked here; see [`PolicyEngine::check_kind`].
    pub fn validate_structure(&self, document: &Value) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();

        let Some(root) = document.as_object() else {
            violations.push(PolicyViolation::blocking(
                ViolationType::InvalidConfiguration,
                "",
                "document must be a mapping",
            ));
            return violations;
        };

        for field in ["apiVersion", "kind", "metadata", "spec"] {
            if !root.contains_key(field) || root[field].is_null() {
                violations.push(PolicyViolation::blocking(
                    ViolationType::RequiredField,
                    field,
                    format!("required field '{}' is missing", field),
                ));
            }
        }

        match root.get("apiVersion") {
            Some(Value::String(v)) if v.contains('/') => {}
            Some(Value::Null) | None => {}
            Some(other) => violations.push(PolicyViolation::blocking(
                ViolationType::InvalidConfiguration,
                "apiVersion",
                format!("apiVersion must be '<group>/<version>', got {}", other),
            )),
        }

        match root.get("kind") {
            Some(Value::String(k)) if !k.is_empty() => {}
            Some(Value::Null) | None => {}
            Some(_) => violations.push(PolicyViolation::blocking(
                ViolationType::InvalidConfiguration,
                "kind",
                "kind must be a non-empty string",
            )),
        }

        match root.get("metadata") {
            Some(Value::Object(metadata)) => {
                match metadata.get("name") {
                    None | Some(Value::Null) => violations.push(PolicyViolation::blocking(
                        ViolationType::RequiredField,
                        "metadata.name",
                        "required field 'metadata.name' is missing",
                    )),
                    Some(Value::String(name)) => {
                        if !is_dns_1123(name) {
                            violations.push(
                                PolicyViolation::blocking(
                                    ViolationType::NamingConvention,
                                    "metadata.name",
                                    format!(
                                        "name '{}' is not a valid DNS-1123 name \
                                         (lowercase alphanumerics and '-', at most {} characters)",
                                        name, MAX_DNS_1123_LENGTH
                                    ),
                                )
                                .with_fix(suggest_dns_name(name), false),
                            );
                        }
                    }
                    Some(_) => violations.push(PolicyViolation::blocking(
                        ViolationType::InvalidConfiguration,
                        "metadata.name",
                        "metadata.name must be a string",
                    )),
                }

                match metadata.get("namespace") {
                    None | Some(Value::Null) => {}
                    Some(Value::String(ns)) if is_dns_1123(ns) => {}
                    Some(Value::String(ns)) => violations.push(PolicyViolation::blocking(
                        ViolationType::NamingConvention,
                        "metadata.namespace",
                        format!("namespace '{}' is not a valid DNS-1123 name", ns),
                    )),
                    Some(_) => violations.push(PolicyViolation::blocking(
                        ViolationType::InvalidConfiguration,
                        "metadata.namespace",
                        "metadata.namespace must be a string",
                    )),
                }
            }
            Some(Value::Null) | None => {
                violations.push(PolicyViolation::blocking(
                    ViolationType::RequiredField,
                    "metadata.name",
                    "required field 'metadata.name' is missing",
                ));
            }
            Some(_) => violations.push(PolicyViolation::blocking(
                ViolationType::InvalidConfiguration,
                "metadata",
                "metadata must be a mapping",
            )),
        }

        match root.get("spec") {
            Some(Value::Object(spec)) if !spec.is_empty() => {}
            Some(Value::Null) | None => {}
            Some(_) => violations.push(PolicyViolation::blocking(
                ViolationType::InvalidConfiguration,
                "spec",
                "spec must be a non-empty mapping",
            )),
        }

        violations
    }

    /// Checks the kind against the supported set.
    pub fn check_kind(&self, document: &Value) -> Option<PolicyViolation> {
        let kind = document.get("kind")?.as_str()?;
        match kind.parse::<ResourceKind>() {
            Ok(_) => None,
            Err(message) => Some(PolicyViolation::blocking(
                ViolationType::InvalidConfiguration,
                "kind",
                message,
            )),
        }
    }

    /// Fabric policies: naming, quotas, labels, namespaces, secrets and
    /// kind-specific configuration checks.
    pub fn evaluate_policies(&self, document: &Value, ctx: PolicyContext) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        let kind = document
            .get("kind")
            .and_then(Value::as_str)
            .and_then(|k| k.parse::<ResourceKind>().ok());
        let metadata = document.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str);

        if let Some(name) = name {
            self.check_name_policy(name, &mut violations);
        }

        let labels = metadata
            .and_then(|m| m.get("labels"))
            .and_then(Value::as_object);
        for required in &self.config.required_labels {
            let present = labels
                .and_then(|l| l.get(required))
                .is_some_and(|v| !v.is_null() && v.as_str() != Some(""));
            if !present {
                violations.push(
                    PolicyViolation::advisory(
                        ViolationType::ComplianceViolation,
                        &format!("metadata.labels.{}", required),
                        format!("required label '{}' is missing", required),
                    )
                    .with_fix(format!("add label '{}: <value>'", required), true),
                );
            }
        }

        if let Some(kind) = kind {
            if self.config.explicit_namespace_kinds.contains(&kind) {
                let namespace = metadata
                    .and_then(|m| m.get("namespace"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if namespace.is_empty() || namespace == DEFAULT_NAMESPACE {
                    violations.push(
                        PolicyViolation::blocking(
                            ViolationType::ComplianceViolation,
                            "metadata.namespace",
                            format!(
                                "{} resources must set an explicit, non-default namespace",
                                kind
                            ),
                        )
                        .with_fix("set metadata.namespace to the owning tenant", false),
                    );
                }
            }

            if let Some(&quota) = self.config.quotas.get(&kind) {
                if ctx.is_new && ctx.existing_of_kind >= quota {
                    violations.push(PolicyViolation::blocking(
                        ViolationType::ResourceLimit,
                        "kind",
                        format!(
                            "quota of {} {} resources per fabric reached ({} present)",
                            quota, kind, ctx.existing_of_kind
                        ),
                    ));
                }
            }
        }

        if let Some(spec) = document.get("spec") {
            let mut secret_paths = Vec::new();
            find_plaintext_secrets(spec, "spec", &mut secret_paths);
            for path in secret_paths {
                let mut v = PolicyViolation::advisory(
                    ViolationType::SecurityRisk,
                    &path,
                    format!("'{}' holds a plaintext credential", path),
                )
                .with_severity(Severity::Critical)
                .with_fix("reference a Kubernetes Secret instead of inlining the value", false);
                v.blocking = self.config.block_plaintext_secrets;
                violations.push(v);
            }

            match kind {
                Some(ResourceKind::Vpc) => check_vpc_spec(spec, &mut violations),
                Some(ResourceKind::VlanNamespace) => {
                    check_vlan_namespace_spec(spec, &mut violations)
                }
                _ => {}
            }
        }

        violations
    }

    fn check_name_policy(&self, name: &str, violations: &mut Vec<PolicyViolation>) {
        if name.len() > self.config.max_name_length {
            violations.push(PolicyViolation::blocking(
                ViolationType::NamingConvention,
                "metadata.name",
                format!(
                    "name '{}' exceeds the fabric limit of {} characters",
                    name, self.config.max_name_length
                ),
            ));
        }
        if let Some(pattern) = &self.name_pattern {
            if !pattern.is_match(name) {
                violations.push(
                    PolicyViolation::advisory(
                        ViolationType::NamingConvention,
                        "metadata.name",
                        format!(
                            "name '{}' does not follow the fabric naming pattern '{}'",
                            name,
                            pattern.as_str()
                        ),
                    )
                    .with_fix(format!("rename to match '{}'", pattern.as_str()), false),
                );
            }
        }
    }
}

/// Lowercases and replaces invalid characters with '-'.
fn suggest_dns_name(name: &str) -> String {
    let mapped: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() {
        "rename to a lowercase alphanumeric name".to_string()
    } else {
        format!("rename to '{}'", trimmed)
    }
}

fn find_plaintext_secrets(value: &Value, path: &str, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = format!("{}.{}", path, key);
                let lower = key.to_lowercase();
                let is_secret_key = SECRET_KEY_MARKERS.iter().any(|m| lower.contains(m));
                match child {
                    Value::String(s) if is_secret_key && !s.is_empty() => found.push(child_path),
                    _ => find_plaintext_secrets(child, &child_path, found),
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                find_plaintext_secrets(item, &format!("{}[{}]", path, i), found);
            }
        }
        _ => {}
    }
}

/// Parses `a.b.c.d/len` into an address and prefix length.
pub fn parse_ipv4_cidr(value: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = value.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    (prefix <= 32).then_some((addr, prefix))
}

fn is_valid_vlan(value: &Value) -> bool {
    value.as_u64().is_some_and(|v| (1..=4094).contains(&v))
}

fn check_vpc_spec(spec: &Value, violations: &mut Vec<PolicyViolation>) {
    let Some(subnets) = spec.get("subnets").and_then(Value::as_object) else {
        return;
    };
    for (name, subnet) in subnets {
        let field = format!("spec.subnets.{}", name);
        if let Some(cidr) = subnet.get("subnet") {
            if cidr.as_str().and_then(parse_ipv4_cidr).is_none() {
                violations.push(PolicyViolation::blocking(
                    ViolationType::InvalidConfiguration,
                    &format!("{}.subnet", field),
                    format!("subnet '{}' is not a valid IPv4 CIDR", cidr),
                ));
            }
        }
        if let Some(vlan) = subnet.get("vlan") {
            if !is_valid_vlan(vlan) {
                violations.push(PolicyViolation::blocking(
                    ViolationType::InvalidConfiguration,
                    &format!("{}.vlan", field),
                    format!("vlan {} is outside 1-4094", vlan),
                ));
            }
        }
    }
}

fn check_vlan_namespace_spec(spec: &Value, violations: &mut Vec<PolicyViolation>) {
    let Some(ranges) = spec.get("ranges").and_then(Value::as_array) else {
        return;
    };
    for (i, range) in ranges.iter().enumerate() {
        let field = format!("spec.ranges[{}]", i);
        let from = range.get("from");
        let to = range.get("to");
        let valid = match (from, to) {
            (Some(f), Some(t)) if is_valid_vlan(f) && is_valid_vlan(t) => f.as_u64() <= t.as_u64(),
            _ => false,
        };
        if !valid {
            violations.push(PolicyViolation::blocking(
                ViolationType::InvalidConfiguration,
                &field,
                "VLAN range needs 1 <= from <= to <= 4094",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default()).unwrap()
    }

    fn valid_vpc() -> Value {
        json!({
            "apiVersion": "vpc.githedgehog.com/v1beta1",
            "kind": "VPC",
            "metadata": {
                "name": "prod-vpc",
                "labels": {"environment": "prod", "team": "netops"}
            },
            "spec": {"subnets": {"default": {"subnet": "10.0.1.0/24", "vlan": 1001}}}
        })
    }

    fn types(violations: &[PolicyViolation]) -> Vec<ViolationType> {
        violations.iter().map(|v| v.violation_type).collect()
    }

    #[test]
    fn test_valid_document_has_no_violations() {
        let v = engine().validate(&valid_vpc(), PolicyContext::default());
        assert!(v.is_empty(), "{:?}", v);
    }

    #[test]
    fn test_missing_name_is_blocking_required_field() {
        let mut doc = valid_vpc();
        doc["metadata"].as_object_mut().unwrap().remove("name");
        let v = engine().validate_structure(&doc);
        assert!(v
            .iter()
            .any(|v| v.violation_type == ViolationType::RequiredField && v.blocking));

        // Other fields broken too: still reported as required_field
        let broken = json!({"metadata": {}, "spec": "nope", "apiVersion": 3});
        let v = engine().validate_structure(&broken);
        assert!(v.iter().any(|v| v.violation_type == ViolationType::RequiredField
            && v.field.as_deref() == Some("metadata.name")
            && v.blocking));
    }

    #[test]
    fn test_missing_top_level_fields() {
        let v = engine().validate_structure(&json!({}));
        let required: Vec<_> = v
            .iter()
            .filter(|v| v.violation_type == ViolationType::RequiredField)
            .filter_map(|v| v.field.clone())
            .collect();
        assert!(required.contains(&"apiVersion".to_string()));
        assert!(required.contains(&"kind".to_string()));
        assert!(required.contains(&"spec".to_string()));
        assert!(required.contains(&"metadata.name".to_string()));
    }

    #[test]
    fn test_invalid_name_is_naming_convention() {
        let mut doc = valid_vpc();
        doc["metadata"]["name"] = json!("Invalid_Name!");
        let v = engine().validate_structure(&doc);
        assert_eq!(types(&v), vec![ViolationType::NamingConvention]);
        assert!(v[0].blocking);
        assert_eq!(
            v[0].suggested_fix.as_deref(),
            Some("rename to 'invalid-name'")
        );
    }

    #[test]
    fn test_dns_1123() {
        assert!(is_dns_1123("a"));
        assert!(is_dns_1123("leaf-01"));
        assert!(!is_dns_1123("-leaf"));
        assert!(!is_dns_1123("leaf-"));
        assert!(!is_dns_1123("Leaf"));
        assert!(!is_dns_1123(""));
        assert!(!is_dns_1123(&"a".repeat(254)));
        assert!(is_dns_1123(&"a".repeat(253)));
    }

    #[test]
    fn test_api_version_and_spec_shape() {
        let mut doc = valid_vpc();
        doc["apiVersion"] = json!("v1");
        doc["spec"] = json!({});
        let v = engine().validate_structure(&doc);
        assert_eq!(v.len(), 2);
        assert!(v
            .iter()
            .all(|v| v.violation_type == ViolationType::InvalidConfiguration && v.blocking));
    }

    #[test]
    fn test_unsupported_kind_passes_structure_but_not_kind_check() {
        let mut doc = valid_vpc();
        doc["kind"] = json!("UnsupportedThing");
        assert!(engine().validate_structure(&doc).is_empty());
        let kind = engine().check_kind(&doc).unwrap();
        assert!(kind.blocking);
        assert!(kind.message.contains("UnsupportedThing"));
    }

    #[test]
    fn test_missing_labels_are_advisory() {
        let mut doc = valid_vpc();
        doc["metadata"].as_object_mut().unwrap().remove("labels");
        let v = engine().evaluate_policies(&doc, PolicyContext::default());
        assert_eq!(v.len(), 2);
        assert!(v.iter().all(|v| !v.blocking && v.can_auto_fix));
        assert!(!has_blocking(&v));
    }

    #[test]
    fn test_name_pattern_is_advisory() {
        let engine = PolicyEngine::new(PolicyConfig {
            name_pattern: Some("^prod-".to_string()),
            ..Default::default()
        })
        .unwrap();
        let mut doc = valid_vpc();
        doc["metadata"]["name"] = json!("staging-vpc");
        let v = engine.evaluate_policies(&doc, PolicyContext::default());
        assert_eq!(types(&v), vec![ViolationType::NamingConvention]);
        assert!(!v[0].blocking);
    }

    #[test]
    fn test_invalid_name_pattern_is_configuration_error() {
        let err = PolicyEngine::new(PolicyConfig {
            name_pattern: Some("(".to_string()),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert_eq!(err.kind(), crate::gitops::error::ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_quota_blocks_only_new_records() {
        let mut quotas = BTreeMap::new();
        quotas.insert(ResourceKind::Vpc, 2);
        let engine = PolicyEngine::new(PolicyConfig {
            quotas,
            ..Default::default()
        })
        .unwrap();
        let full = PolicyContext {
            existing_of_kind: 2,
            is_new: true,
        };
        let v = engine.evaluate_policies(&valid_vpc(), full);
        assert_eq!(types(&v), vec![ViolationType::ResourceLimit]);
        assert!(v[0].blocking);

        let update = PolicyContext {
            existing_of_kind: 2,
            is_new: false,
        };
        assert!(engine.evaluate_policies(&valid_vpc(), update).is_empty());
    }

    #[test]
    fn test_explicit_namespace_kinds() {
        let engine = PolicyEngine::new(PolicyConfig {
            explicit_namespace_kinds: vec![ResourceKind::Vpc],
            ..Default::default()
        })
        .unwrap();
        let v = engine.evaluate_policies(&valid_vpc(), PolicyContext::default());
        assert_eq!(types(&v), vec![ViolationType::ComplianceViolation]);

        let mut doc = valid_vpc();
        doc["metadata"]["namespace"] = json!("tenant-a");
        assert!(engine
            .evaluate_policies(&doc, PolicyContext::default())
            .is_empty());
    }

    #[test]
    fn test_plaintext_secret_is_security_risk() {
        let doc = json!({
            "apiVersion": "wiring.githedgehog.com/v1beta1",
            "kind": "Switch",
            "metadata": {"name": "leaf-01", "labels": {"environment": "a", "team": "b"}},
            "spec": {"role": "server-leaf", "users": [{"name": "admin", "password": "hunter2"}]}
        });
        let v = engine().evaluate_policies(&doc, PolicyContext::default());
        assert_eq!(types(&v), vec![ViolationType::SecurityRisk]);
        assert_eq!(v[0].severity, Severity::Critical);
        assert!(v[0].blocking);
        assert_eq!(v[0].field.as_deref(), Some("spec.users[0].password"));
    }

    #[test]
    fn test_vpc_subnet_checks() {
        let mut doc = valid_vpc();
        doc["spec"]["subnets"]["default"] = json!({"subnet": "10.0.1.0/33", "vlan": 5000});
        let v = engine().evaluate_policies(&doc, PolicyContext::default());
        assert_eq!(v.len(), 2);
        assert!(v
            .iter()
            .all(|v| v.violation_type == ViolationType::InvalidConfiguration));
    }

    #[test]
    fn test_vlan_namespace_ranges() {
        let doc = json!({
            "apiVersion": "wiring.githedgehog.com/v1beta1",
            "kind": "VLANNamespace",
            "metadata": {"name": "default", "labels": {"environment": "a", "team": "b"}},
            "spec": {"ranges": [{"from": 1000, "to": 2999}, {"from": 3000, "to": 2000}]}
        });
        let v = engine().evaluate_policies(&doc, PolicyContext::default());
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].field.as_deref(), Some("spec.ranges[1]"));
    }

    #[test]
    fn test_parse_ipv4_cidr() {
        assert_eq!(
            parse_ipv4_cidr("10.0.0.0/8"),
            Some((Ipv4Addr::new(10, 0, 0, 0), 8))
        );
        assert!(parse_ipv4_cidr("10.0.0.0").is_none());
        assert!(parse_ipv4_cidr("300.0.0.0/8").is_none());
    }
}

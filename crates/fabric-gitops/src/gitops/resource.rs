//! K8s-style resource types for network fabric manifests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group for VPC-level resources.
pub const VPC_API_VERSION: &str = "vpc.githedgehog.com/v1beta1";

/// API group for wiring (physical) resources.
pub const WIRING_API_VERSION: &str = "wiring.githedgehog.com/v1beta1";

/// The namespace that is folded away when deriving file names.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The kind of a fabric resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "VPC")]
    Vpc,
    External,
    ExternalAttachment,
    ExternalPeering,
    #[serde(rename = "IPv4Namespace")]
    Ipv4Namespace,
    #[serde(rename = "VPCAttachment")]
    VpcAttachment,
    #[serde(rename = "VPCPeering")]
    VpcPeering,
    Connection,
    Server,
    Switch,
    SwitchGroup,
    #[serde(rename = "VLANNamespace")]
    VlanNamespace,
}

impl ResourceKind {
    /// Returns the managed subdirectory name for resources of this kind.
    pub fn directory(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpcs",
            ResourceKind::External => "externals",
            ResourceKind::ExternalAttachment => "externalattachments",
            ResourceKind::ExternalPeering => "externalpeerings",
            ResourceKind::Ipv4Namespace => "ipv4namespaces",
            ResourceKind::VpcAttachment => "vpcattachments",
            ResourceKind::VpcPeering => "vpcpeerings",
            ResourceKind::Connection => "connections",
            ResourceKind::Server => "servers",
            ResourceKind::Switch => "switches",
            ResourceKind::SwitchGroup => "switchgroups",
            ResourceKind::VlanNamespace => "vlannamespaces",
        }
    }

    /// The canonical kind string as it appears in manifests.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "VPC",
            ResourceKind::External => "External",
            ResourceKind::ExternalAttachment => "ExternalAttachment",
            ResourceKind::ExternalPeering => "ExternalPeering",
            ResourceKind::Ipv4Namespace => "IPv4Namespace",
            ResourceKind::VpcAttachment => "VPCAttachment",
            ResourceKind::VpcPeering => "VPCPeering",
            ResourceKind::Connection => "Connection",
            ResourceKind::Server => "Server",
            ResourceKind::Switch => "Switch",
            ResourceKind::SwitchGroup => "SwitchGroup",
            ResourceKind::VlanNamespace => "VLANNamespace",
        }
    }

    /// The API version new manifests of this kind are written with.
    pub fn default_api_version(&self) -> &'static str {
        match self {
            ResourceKind::Vpc
            | ResourceKind::External
            | ResourceKind::ExternalAttachment
            | ResourceKind::ExternalPeering
            | ResourceKind::Ipv4Namespace
            | ResourceKind::VpcAttachment
            | ResourceKind::VpcPeering => VPC_API_VERSION,
            ResourceKind::Connection
            | ResourceKind::Server
            | ResourceKind::Switch
            | ResourceKind::SwitchGroup
            | ResourceKind::VlanNamespace => WIRING_API_VERSION,
        }
    }

    /// Returns all supported resource kinds.
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Vpc,
            ResourceKind::External,
            ResourceKind::ExternalAttachment,
            ResourceKind::ExternalPeering,
            ResourceKind::Ipv4Namespace,
            ResourceKind::VpcAttachment,
            ResourceKind::VpcPeering,
            ResourceKind::Connection,
            ResourceKind::Server,
            ResourceKind::Switch,
            ResourceKind::SwitchGroup,
            ResourceKind::VlanNamespace,
        ]
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    /// Kind names are matched exactly; `vpc` is not a `VPC`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::all()
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown resource kind: {}", s))
    }
}

/// Metadata for a resource, following K8s conventions.
///
/// Maps are ordered so encoding the same resource twice yields identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Creates a new ObjectMeta with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Adds a label to the metadata.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds an annotation to the metadata.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// The namespace with empty strings treated as absent.
    pub fn namespace_or_default(&self) -> &str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => DEFAULT_NAMESPACE,
        }
    }
}

/// A fabric manifest with an opaque spec.
///
/// `kind` stays a string so that manifests with unsupported kinds can still be
/// decoded and reported; [`Manifest::resource_kind`] is the allow-list gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Manifest {
    /// Creates a manifest for a supported kind with its default API version.
    pub fn new(kind: ResourceKind, metadata: ObjectMeta, spec: serde_json::Value) -> Self {
        Self {
            api_version: kind.default_api_version().to_string(),
            kind: kind.as_str().to_string(),
            metadata,
            spec,
        }
    }

    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Resolves the kind against the supported set.
    pub fn resource_kind(&self) -> Result<ResourceKind, String> {
        self.kind.parse()
    }

    /// Builds a manifest from a generic decoded document.
    pub fn from_document(document: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document.clone())
    }
}

//! `nodelabel-types` – shared vocabulary of the discovery-to-label pipeline.
//!
//! Every other crate in the workspace speaks in these types: the raw
//! [`DomainFeatures`] tree a detector produces, the [`CandidateLabels`] a
//! label source proposes, the final [`Labels`] map handed to a publisher, and
//! the single [`DiscoveryError`] enum used across crate boundaries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Final label set: fully-qualified label name → value.
///
/// A `BTreeMap` keeps iteration (and therefore serialisation) order stable so
/// two cycles with the same input produce byte-identical output.
pub type Labels = BTreeMap<String, String>;

/// Candidate labels proposed by one label source, before validation.
pub type CandidateLabels = BTreeMap<String, LabelValue>;

/// Raw feature trees of every detector that completed discovery, keyed by
/// source name.
pub type Features = BTreeMap<String, DomainFeatures>;

/// Value of a candidate label as produced by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelValue::Bool(b) => write!(f, "{b}"),
            LabelValue::Int(i) => write!(f, "{i}"),
            LabelValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for LabelValue {
    fn from(value: bool) -> Self {
        LabelValue::Bool(value)
    }
}

impl From<i64> for LabelValue {
    fn from(value: i64) -> Self {
        LabelValue::Int(value)
    }
}

impl From<&str> for LabelValue {
    fn from(value: &str) -> Self {
        LabelValue::Str(value.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(value: String) -> Self {
        LabelValue::Str(value)
    }
}

/// One discovered instance (e.g. a single PCI device): attribute name → value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFeature {
    pub attributes: BTreeMap<String, String>,
}

impl InstanceFeature {
    pub fn new(attributes: BTreeMap<String, String>) -> Self {
        Self { attributes }
    }
}

/// Raw feature tree of a single detector source.
///
/// The three collections are independent.  A detector builds a fresh value
/// on every discovery pass and swaps it in whole; the tree is never merged
/// across passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFeatures {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub flags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceFeature>,
}

impl DomainFeatures {
    /// `true` when the detector found nothing at all.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.attributes.is_empty() && self.instances.is_empty()
    }
}

/// Identity and bookkeeping metadata sent with every publish call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub node_name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl NodeMetadata {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            annotations: BTreeMap::new(),
        }
    }

    /// Builder-style annotation setter.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// Global error type spanning source failures, configuration problems,
/// label validation and delivery to the control plane.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Source {source_name} failed: {details}")]
    Source {
        source_name: String,
        details: String,
    },

    #[error("Registry Error: {0}")]
    Registry(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Invalid label {name:?}: {details}")]
    InvalidLabel { name: String, details: String },

    #[error("Publish Error: {0}")]
    Publish(String),

    #[error("Watch Error: {0}")]
    Watch(String),

    #[error("I/O Error: {0}")]
    Io(String),
}

impl DiscoveryError {
    /// Shorthand for a [`DiscoveryError::Source`].
    pub fn source(source_name: impl Into<String>, details: impl Into<String>) -> Self {
        DiscoveryError::Source {
            source_name: source_name.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_label_value_renders_as_true() {
        assert_eq!(LabelValue::from(true).to_string(), "true");
        assert_eq!(LabelValue::from(false).to_string(), "false");
        assert_eq!(LabelValue::from(42_i64).to_string(), "42");
        assert_eq!(LabelValue::from("avx2").to_string(), "avx2");
    }

    #[test]
    fn label_value_deserializes_untagged() {
        let values: Vec<LabelValue> = serde_json::from_str(r#"[true, 7, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![LabelValue::Bool(true), LabelValue::Int(7), LabelValue::Str("x".into())]
        );
    }

    #[test]
    fn empty_domain_features_serialize_to_empty_object() {
        let features = DomainFeatures::default();
        assert!(features.is_empty());
        assert_eq!(serde_json::to_string(&features).unwrap(), "{}");
    }

    #[test]
    fn features_serialization_is_ordered() {
        let mut a = DomainFeatures::default();
        a.attributes.insert("zeta".into(), "1".into());
        a.attributes.insert("alpha".into(), "2".into());
        a.flags.insert("sse4".into());
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, r#"{"flags":["sse4"],"attributes":{"alpha":"2","zeta":"1"}}"#);
    }

    #[test]
    fn node_metadata_builder_adds_annotations() {
        let meta = NodeMetadata::new("node-1").with_annotation("a", "b");
        assert_eq!(meta.node_name, "node-1");
        assert_eq!(meta.annotations.get("a").map(String::as_str), Some("b"));
    }

    #[test]
    fn discovery_error_display() {
        let err = DiscoveryError::source("cpu", "cpuid unavailable");
        assert!(err.to_string().contains("cpu"));
        assert!(err.to_string().contains("cpuid unavailable"));

        let err = DiscoveryError::InvalidLabel {
            name: "bad name".into(),
            details: "contains a space".into(),
        };
        assert!(err.to_string().contains("bad name"));
    }
}

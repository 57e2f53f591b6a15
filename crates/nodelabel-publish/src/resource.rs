//! [`ResourcePublisher`] – maintains one `NodeFeature` document per node.
//!
//! Each pass renders the snapshot as a [`NodeFeature`] and writes it to
//! `<dir>/<node>.json`.  The write is skipped when the stored document is
//! already identical, and otherwise goes through a temporary file and a
//! rename so readers never see a half-written document.
//!
//! With a signing key configured, the `spec` section is signed with
//! HMAC-SHA256 and the hex digest stored in the
//! [`SIGNATURE_ANNOTATION`] annotation.  [`verify_signature`] checks it.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use nodelabel_types::{DiscoveryError, Features, Labels, NodeMetadata};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::Publisher;

pub const API_VERSION: &str = "nodelabel.io/v1alpha1";
pub const KIND: &str = "NodeFeature";
pub const NODE_NAME_LABEL: &str = "nodelabel.io/node-name";
pub const SIGNATURE_ANNOTATION: &str = "nodelabel.io/signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFeatureSpec {
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub labels: Labels,
}

/// Per-node record of discovered features and labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFeature {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: NodeFeatureSpec,
}

impl NodeFeature {
    pub fn new(labels: &Labels, features: &Features, metadata: &NodeMetadata) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ObjectMeta {
                name: metadata.node_name.clone(),
                labels: BTreeMap::from([(NODE_NAME_LABEL.to_string(), metadata.node_name.clone())]),
                annotations: metadata.annotations.clone(),
            },
            spec: NodeFeatureSpec {
                features: features.clone(),
                labels: labels.clone(),
            },
        }
    }
}

fn spec_mac(spec: &NodeFeatureSpec, key: &[u8]) -> Result<HmacSha256, DiscoveryError> {
    let payload = serde_json::to_vec(spec)
        .map_err(|e| DiscoveryError::Publish(format!("failed to encode spec: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| DiscoveryError::Publish(format!("invalid signing key: {e}")))?;
    mac.update(&payload);
    Ok(mac)
}

/// Hex HMAC-SHA256 of the document's `spec`.
pub fn sign(document: &NodeFeature, key: &[u8]) -> Result<String, DiscoveryError> {
    Ok(hex::encode(spec_mac(&document.spec, key)?.finalize().into_bytes()))
}

/// Whether the document carries a valid signature for `key`.
pub fn verify_signature(document: &NodeFeature, key: &[u8]) -> bool {
    let Some(signature) = document.metadata.annotations.get(SIGNATURE_ANNOTATION) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    spec_mac(&document.spec, key).is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
}

fn load_key(path: &Path) -> Result<Zeroizing<Vec<u8>>, DiscoveryError> {
    let raw = Zeroizing::new(std::fs::read(path).map_err(|e| {
        DiscoveryError::Config(format!("failed to read signing key {}: {e}", path.display()))
    })?);
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    if end == 0 {
        return Err(DiscoveryError::Config(format!(
            "signing key {} is empty",
            path.display()
        )));
    }
    Ok(Zeroizing::new(raw[..end].to_vec()))
}

/// Publisher writing `NodeFeature` documents into a directory.
pub struct ResourcePublisher {
    dir: PathBuf,
    signing_key_file: Option<PathBuf>,
    signing_key: Option<Zeroizing<Vec<u8>>>,
}

impl ResourcePublisher {
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] when the signing key cannot be
    /// read.
    pub fn new(dir: PathBuf, signing_key_file: Option<PathBuf>) -> Result<Self, DiscoveryError> {
        let signing_key = signing_key_file.as_deref().map(load_key).transpose()?;
        Ok(Self {
            dir,
            signing_key_file,
            signing_key,
        })
    }

    /// Location of the document for `node_name`.
    pub fn document_path(&self, node_name: &str) -> Result<PathBuf, DiscoveryError> {
        if node_name.is_empty() || node_name.contains(['/', '\\']) || node_name.starts_with('.') {
            return Err(DiscoveryError::Publish(format!(
                "node name {node_name:?} cannot be used as a document name"
            )));
        }
        Ok(self.dir.join(format!("{node_name}.json")))
    }

    /// Render the document for one snapshot, signed when a key is loaded.
    pub fn render(
        &self,
        labels: &Labels,
        features: &Features,
        metadata: &NodeMetadata,
    ) -> Result<NodeFeature, DiscoveryError> {
        let mut document = NodeFeature::new(labels, features, metadata);
        if let Some(key) = &self.signing_key {
            let signature = sign(&document, key)?;
            document
                .metadata
                .annotations
                .insert(SIGNATURE_ANNOTATION.to_string(), signature);
        }
        Ok(document)
    }

    async fn stored(&self, path: &Path) -> Option<NodeFeature> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "existing document not readable");
                None
            }
        }
    }
}

#[async_trait]
impl Publisher for ResourcePublisher {
    fn name(&self) -> &str {
        "resource"
    }

    async fn publish(
        &self,
        labels: &Labels,
        features: &Features,
        metadata: &NodeMetadata,
    ) -> Result<(), DiscoveryError> {
        let path = self.document_path(&metadata.node_name)?;
        let document = self.render(labels, features, metadata)?;

        if self.stored(&path).await.as_ref() == Some(&document) {
            debug!(path = %path.display(), "NodeFeature unchanged, not updating");
            return Ok(());
        }

        let io_err = |e: std::io::Error| {
            DiscoveryError::Publish(format!("failed to write {}: {e}", path.display()))
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| DiscoveryError::Publish(format!("failed to encode NodeFeature: {e}")))?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", metadata.node_name));
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        info!(path = %path.display(), labels = labels.len(), "NodeFeature updated");
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), DiscoveryError> {
        self.signing_key = self.signing_key_file.as_deref().map(load_key).transpose()?;
        info!(signed = self.signing_key.is_some(), "reloaded signing key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodelabel_types::DomainFeatures;

    fn snapshot() -> (Labels, Features, NodeMetadata) {
        let labels = Labels::from([("vendor.io/accel".to_string(), "true".to_string())]);
        let mut tree = DomainFeatures::default();
        tree.attributes.insert("vendor.io/accel".into(), "true".into());
        let features = Features::from([("local".to_string(), tree)]);
        (labels, features, NodeMetadata::new("worker-1"))
    }

    #[tokio::test]
    async fn writes_node_feature_document() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = ResourcePublisher::new(dir.path().to_path_buf(), None).unwrap();
        let (labels, features, metadata) = snapshot();
        publisher.publish(&labels, &features, &metadata).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("worker-1.json")).unwrap();
        let document: NodeFeature = serde_json::from_str(&text).unwrap();
        assert_eq!(document.kind, KIND);
        assert_eq!(document.api_version, API_VERSION);
        assert_eq!(document.metadata.labels[NODE_NAME_LABEL], "worker-1");
        assert_eq!(document.spec.labels, labels);
        assert_eq!(document.spec.features, features);
        assert!(!document.metadata.annotations.contains_key(SIGNATURE_ANNOTATION));
    }

    #[tokio::test]
    async fn unchanged_snapshot_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = ResourcePublisher::new(dir.path().to_path_buf(), None).unwrap();
        let (labels, features, metadata) = snapshot();
        publisher.publish(&labels, &features, &metadata).await.unwrap();

        let path = dir.path().join("worker-1.json");
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        publisher.publish(&labels, &features, &metadata).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);

        let mut changed = labels.clone();
        changed.insert("extra".into(), "1".into());
        publisher.publish(&changed, &features, &metadata).await.unwrap();
        let document: NodeFeature =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document.spec.labels, changed);
    }

    #[tokio::test]
    async fn signed_documents_verify_and_detect_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("signing.key");
        std::fs::write(&key_file, "s3cret\n").unwrap();
        let out = dir.path().join("out");
        let publisher = ResourcePublisher::new(out.clone(), Some(key_file)).unwrap();
        let (labels, features, metadata) = snapshot();
        publisher.publish(&labels, &features, &metadata).await.unwrap();

        let mut document: NodeFeature =
            serde_json::from_str(&std::fs::read_to_string(out.join("worker-1.json")).unwrap())
                .unwrap();
        assert!(verify_signature(&document, b"s3cret"));
        assert!(!verify_signature(&document, b"other"));

        document.spec.labels.insert("forged".into(), "1".into());
        assert!(!verify_signature(&document, b"s3cret"));
    }

    #[tokio::test]
    async fn reconnect_picks_up_a_rotated_key() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("signing.key");
        std::fs::write(&key_file, "old").unwrap();
        let mut publisher =
            ResourcePublisher::new(dir.path().join("out"), Some(key_file.clone())).unwrap();

        std::fs::write(&key_file, "new").unwrap();
        publisher.reconnect().await.unwrap();

        let (labels, features, metadata) = snapshot();
        let document = publisher.render(&labels, &features, &metadata).unwrap();
        assert!(verify_signature(&document, b"new"));
    }

    #[test]
    fn empty_or_missing_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("empty.key");
        std::fs::write(&key_file, "\n").unwrap();
        assert!(ResourcePublisher::new(dir.path().to_path_buf(), Some(key_file)).is_err());
        assert!(
            ResourcePublisher::new(dir.path().to_path_buf(), Some(dir.path().join("absent")))
                .is_err()
        );
    }

    #[test]
    fn unsafe_node_names_are_refused() {
        let publisher = ResourcePublisher::new(PathBuf::from("/tmp"), None).unwrap();
        for name in ["", "../etc/passwd", ".hidden", "a/b"] {
            assert!(publisher.document_path(name).is_err(), "{name:?}");
        }
        assert!(publisher.document_path("worker-1").is_ok());
    }
}

//! [`HttpPublisher`] – delivers labels with one `POST` per pass.
//!
//! The request goes to `<server>/v1/labels` with a JSON body:
//!
//! ```json
//! {
//!   "nodeName": "worker-1",
//!   "annotations": { "nodelabel.io/worker.version": "0.1.0" },
//!   "labels": { "vendor.io/accel": "true" },
//!   "features": { "local": { "attributes": { "vendor.io/accel": "true" } } }
//! }
//! ```
//!
//! Any non-2xx status is an error.  With [`TlsFiles`] set the client
//! verifies the server against the given CA and presents a client identity.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nodelabel_types::{DiscoveryError, Features, Labels, NodeMetadata};
use reqwest::{Certificate, Client, Identity};
use serde::Serialize;
use tracing::{debug, info};

use crate::Publisher;

/// Path of the labelling endpoint, relative to the server URL.
pub const LABELS_PATH: &str = "/v1/labels";

/// PEM files used for TLS.  All optional; a client certificate requires
/// its key and vice versa.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl TlsFiles {
    pub fn paths(&self) -> Vec<PathBuf> {
        [&self.ca_file, &self.cert_file, &self.key_file]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelsRequest<'a> {
    node_name: &'a str,
    annotations: &'a std::collections::BTreeMap<String, String>,
    labels: &'a Labels,
    features: &'a Features,
}

fn read_pem(path: &Path) -> Result<Vec<u8>, DiscoveryError> {
    std::fs::read(path)
        .map_err(|e| DiscoveryError::Config(format!("failed to read {}: {e}", path.display())))
}

fn build_client(tls: &TlsFiles) -> Result<Client, DiscoveryError> {
    let mut builder = Client::builder();

    if let Some(ca_file) = &tls.ca_file {
        let ca = Certificate::from_pem(&read_pem(ca_file)?).map_err(|e| {
            DiscoveryError::Config(format!("invalid CA certificate {}: {e}", ca_file.display()))
        })?;
        builder = builder.add_root_certificate(ca);
    }

    match (&tls.cert_file, &tls.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let identity = Identity::from_pkcs8_pem(&read_pem(cert_file)?, &read_pem(key_file)?)
                .map_err(|e| {
                    DiscoveryError::Config(format!(
                        "invalid client identity {}: {e}",
                        cert_file.display()
                    ))
                })?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(DiscoveryError::Config(
                "a client certificate and its key must be given together".into(),
            ));
        }
    }

    builder
        .build()
        .map_err(|e| DiscoveryError::Config(format!("failed to build HTTP client: {e}")))
}

/// Publisher posting each snapshot to a labelling endpoint.
pub struct HttpPublisher {
    server: String,
    tls: TlsFiles,
    client: Client,
}

impl HttpPublisher {
    /// Create a publisher for `server` (e.g. `"https://labeler:8080"`).
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] when TLS material cannot be loaded.
    pub fn new(server: impl Into<String>, tls: TlsFiles) -> Result<Self, DiscoveryError> {
        let client = build_client(&tls)?;
        Ok(Self {
            server: server.into().trim_end_matches('/').to_string(),
            tls,
            client,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{LABELS_PATH}", self.server)
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    fn name(&self) -> &str {
        "http"
    }

    async fn publish(
        &self,
        labels: &Labels,
        features: &Features,
        metadata: &NodeMetadata,
    ) -> Result<(), DiscoveryError> {
        let body = LabelsRequest {
            node_name: &metadata.node_name,
            annotations: &metadata.annotations,
            labels,
            features,
        };
        let url = self.endpoint();
        debug!(url = %url, labels = labels.len(), "sending labeling request");

        self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| DiscoveryError::Publish(format!("labeling request to {url} failed: {e}")))?;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), DiscoveryError> {
        self.client = build_client(&self.tls)?;
        info!(server = %self.server, "reloaded TLS credentials");
        Ok(())
    }
}

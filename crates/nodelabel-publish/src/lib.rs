//! `nodelabel-publish` – delivery of the final label set to the control plane.
//!
//! The pipeline never talks to a transport directly.  It hands the labels,
//! the raw feature trees and the node metadata to a [`Publisher`], and
//! treats any error as fatal to the run.
//!
//! # Overview
//!
//! - [`Publisher`] – the trait every delivery mode implements.
//! - [`HttpPublisher`][crate::http::HttpPublisher] – synchronous call to a
//!   labelling endpoint, optionally over mutual TLS.
//! - [`ResourcePublisher`][crate::resource::ResourcePublisher] – idempotent
//!   create-or-update of a per-node `NodeFeature` document, optionally
//!   signed.
//! - [`PublisherSettings`] – selects and builds one of the above.

pub mod http;
pub mod resource;

use std::path::PathBuf;

use async_trait::async_trait;
use nodelabel_types::{DiscoveryError, Features, Labels, NodeMetadata};

pub use http::{HttpPublisher, TlsFiles};
pub use resource::{NodeFeature, ResourcePublisher};

/// Every delivery mode must implement this trait.
///
/// # Contract
///
/// * `publish` – deliver one snapshot.  Any error ends the run; there is no
///   internal retry.
/// * `reconnect` – reload credentials after they changed on disk.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short name for logs, e.g. `"http"`.
    fn name(&self) -> &str;

    /// Deliver one snapshot.
    async fn publish(
        &self,
        labels: &Labels,
        features: &Features,
        metadata: &NodeMetadata,
    ) -> Result<(), DiscoveryError>;

    /// Reload credentials.  The default does nothing.
    async fn reconnect(&mut self) -> Result<(), DiscoveryError> {
        Ok(())
    }
}

/// Which publisher to build, with its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherSettings {
    Http { server: String, tls: TlsFiles },
    Resource {
        dir: PathBuf,
        signing_key_file: Option<PathBuf>,
    },
}

impl PublisherSettings {
    /// Files whose change should trigger [`Publisher::reconnect`].
    pub fn credential_paths(&self) -> Vec<PathBuf> {
        match self {
            PublisherSettings::Http { tls, .. } => tls.paths(),
            PublisherSettings::Resource {
                signing_key_file, ..
            } => signing_key_file.iter().cloned().collect(),
        }
    }

    /// Build the configured publisher.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] when credential material cannot be
    /// loaded.
    pub fn build(&self) -> Result<Box<dyn Publisher>, DiscoveryError> {
        match self {
            PublisherSettings::Http { server, tls } => {
                Ok(Box::new(HttpPublisher::new(server.clone(), tls.clone())?))
            }
            PublisherSettings::Resource {
                dir,
                signing_key_file,
            } => Ok(Box::new(ResourcePublisher::new(
                dir.clone(),
                signing_key_file.clone(),
            )?)),
        }
    }
}

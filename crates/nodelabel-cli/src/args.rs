//! Command-line surface of the worker and its translation into settings.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use nodelabel_core::CliOverrides;
use nodelabel_publish::{PublisherSettings, TlsFiles};
use nodelabel_types::DiscoveryError;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/nodelabel/nodelabel-worker.conf";
pub const DEFAULT_SERVER: &str = "http://localhost:8080";
pub const DEFAULT_RESOURCE_DIR: &str = "/var/lib/nodelabel/nodefeatures";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PublisherKind {
    /// POST labels to a labelling endpoint.
    Http,
    /// Maintain a NodeFeature document per node.
    Resource,
}

/// Detects node features and publishes them as labels.
#[derive(Parser, Debug)]
#[command(name = "nodelabel-worker", version, long_about = None)]
pub struct Args {
    /// Config file (.yaml, .json or .toml); a missing file means defaults.
    #[arg(long, env = "NODELABEL_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Inline config document merged over the config file.
    #[arg(long)]
    pub options: Option<String>,

    /// Discover and log labels without publishing them.
    #[arg(long)]
    pub no_publish: bool,

    /// Run one pass and exit.
    #[arg(long)]
    pub oneshot: bool,

    /// Comma-separated detector sources (overrides core.featureSources).
    #[arg(long, value_delimiter = ',')]
    pub feature_sources: Option<Vec<String>>,

    /// Comma-separated label sources (overrides core.labelSources).
    #[arg(long, value_delimiter = ',')]
    pub label_sources: Option<Vec<String>>,

    #[arg(long, value_enum, default_value_t = PublisherKind::Http)]
    pub publisher: PublisherKind,

    /// Labelling endpoint base URL (http publisher).
    #[arg(long, default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Output directory for NodeFeature documents (resource publisher).
    #[arg(long, default_value = DEFAULT_RESOURCE_DIR)]
    pub resource_dir: PathBuf,

    /// CA certificate for verifying the server.
    #[arg(long)]
    pub ca_file: Option<PathBuf>,

    /// Client certificate (PEM).
    #[arg(long)]
    pub cert_file: Option<PathBuf>,

    /// Client private key (PKCS#8 PEM).
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// HMAC key used to sign NodeFeature documents.
    #[arg(long)]
    pub signing_key_file: Option<PathBuf>,

    /// Node name; defaults to the host name.
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,
}

impl Args {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            no_publish: self.no_publish.then_some(true),
            feature_sources: self.feature_sources.clone(),
            label_sources: self.label_sources.clone(),
        }
    }

    pub fn publisher_settings(&self) -> PublisherSettings {
        match self.publisher {
            PublisherKind::Http => PublisherSettings::Http {
                server: self.server.clone(),
                tls: TlsFiles {
                    ca_file: self.ca_file.clone(),
                    cert_file: self.cert_file.clone(),
                    key_file: self.key_file.clone(),
                },
            },
            PublisherKind::Resource => PublisherSettings::Resource {
                dir: self.resource_dir.clone(),
                signing_key_file: self.signing_key_file.clone(),
            },
        }
    }

    /// `--node-name` / `NODE_NAME`, falling back to the host name.
    pub fn node_name(&self) -> Result<String, DiscoveryError> {
        if let Some(name) = self.node_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return Ok(name.to_string());
        }
        hostname::get()
            .map_err(|e| DiscoveryError::Io(format!("failed to read host name: {e}")))?
            .into_string()
            .map_err(|_| DiscoveryError::Io("host name is not valid UTF-8".into()))
    }
}

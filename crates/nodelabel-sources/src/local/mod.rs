//! The `local` source: user-authored feature files and deprecated hooks.
//!
//! This is the highest-priority default label source, and its label names
//! are published exactly as written (no `local-` prefix).  Raw features end
//! up in the source's attribute map; labels are kept next to them and
//! returned by [`LabelSource::labels`].
//!
//! # Configuration
//!
//! ```yaml
//! sources:
//!   local:
//!     featuresDir: /etc/nodelabel/features.d
//!     hooksDir: /etc/nodelabel/source.d
//!     hooksEnabled: false
//! ```

pub mod files;
pub mod hooks;
pub mod parser;

use std::path::PathBuf;

use chrono::Utc;
use nodelabel_types::{CandidateLabels, DiscoveryError, DomainFeatures, LabelValue};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::source::{ConfigurableSource, FeatureSource, LabelSource, Source};

use parser::ParsedFeatures;

/// Registry name of the local source.
pub const NAME: &str = "local";

/// Label priority; places the local source after every other default source.
pub const PRIORITY: i32 = 20;

pub const DEFAULT_FEATURES_DIR: &str = "/etc/nodelabel/features.d";
pub const DEFAULT_HOOKS_DIR: &str = "/etc/nodelabel/source.d";

/// Configuration of the local source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalConfig {
    pub features_dir: PathBuf,
    pub hooks_dir: PathBuf,
    pub hooks_enabled: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            features_dir: PathBuf::from(DEFAULT_FEATURES_DIR),
            hooks_dir: PathBuf::from(DEFAULT_HOOKS_DIR),
            hooks_enabled: false,
        }
    }
}

#[derive(Default)]
struct Discovered {
    features: DomainFeatures,
    labels: CandidateLabels,
}

/// Feature-file and hook reader.
pub struct LocalSource {
    config: RwLock<LocalConfig>,
    discovered: RwLock<Discovered>,
}

impl LocalSource {
    pub fn new() -> Self {
        Self::with_config(LocalConfig::default())
    }

    pub fn with_config(config: LocalConfig) -> Self {
        Self {
            config: RwLock::new(config),
            discovered: RwLock::new(Discovered::default()),
        }
    }
}

impl Default for LocalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for LocalSource {
    fn name(&self) -> &str {
        NAME
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        vec![self.config.read().features_dir.clone()]
    }
}

impl FeatureSource for LocalSource {
    fn discover(&self) -> Result<(), DiscoveryError> {
        let config = self.config.read().clone();
        let now = Utc::now();

        let mut parsed = ParsedFeatures::default();
        if config.hooks_enabled {
            parsed.absorb(hooks::run_hooks(&config.hooks_dir, now), "hooks");
        }
        parsed.absorb(files::read_feature_files(&config.features_dir, now), "feature files");

        debug!(
            features = parsed.features.len(),
            labels = parsed.labels.len(),
            "local discovery finished"
        );

        let next = Discovered {
            features: DomainFeatures {
                attributes: parsed.features,
                ..DomainFeatures::default()
            },
            labels: parsed
                .labels
                .into_iter()
                .map(|(k, v)| (k, LabelValue::Str(v)))
                .collect(),
        };
        *self.discovered.write() = next;
        Ok(())
    }

    fn features(&self) -> DomainFeatures {
        self.discovered.read().features.clone()
    }
}

impl LabelSource for LocalSource {
    fn labels(&self) -> Result<CandidateLabels, DiscoveryError> {
        Ok(self.discovered.read().labels.clone())
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    fn uses_name_prefix(&self) -> bool {
        false
    }
}

impl ConfigurableSource for LocalSource {
    type Config = LocalConfig;

    fn config(&self) -> LocalConfig {
        self.config.read().clone()
    }

    fn set_config(&self, config: LocalConfig) {
        *self.config.write() = config;
    }
}

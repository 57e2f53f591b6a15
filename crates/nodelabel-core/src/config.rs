//! Layered configuration and source selection.
//!
//! The effective configuration is built from four layers, lowest precedence
//! first:
//!
//! | Layer | Origin                                   | Missing means         |
//! |-------|------------------------------------------|-----------------------|
//! | 1     | built-in defaults                        | n/a                   |
//! | 2     | config file (`.toml`, `.yaml`, `.json`)  | defaults, logged      |
//! | 3     | inline override document (`--options`)  | nothing to merge      |
//! | 4     | command-line overrides ([`CliOverrides`])| nothing to override   |
//!
//! Layers 1–3 are deep-merged as documents, so a layer only overrides the
//! keys it names.  [`ConfigEngine::configure`] then selects the enabled
//! sources and hands every configurable source its section.
//!
//! ```yaml
//! core:
//!   labelWhiteList: "^cpu"
//!   noPublish: false
//!   sleepInterval: 60s
//!   featureSources: [all]
//!   labelSources: [all, -fake]
//! sources:
//!   local:
//!     featuresDir: /etc/nodelabel/features.d
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nodelabel_sources::{
    Capability, FeatureSource, LabelSource, PreparedConfig, SourceRegistry, merge_documents,
};
use nodelabel_types::DiscoveryError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;
use tracing::{debug, info, warn};

/// Token expanding to every registered source that is not disabled by
/// default.
pub const ALL_SOURCES: &str = "all";

pub const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_SLEEP_INTERVAL: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Whitelist
// ─────────────────────────────────────────────────────────────────────────────

/// Regular expression restricting which label names are published.
///
/// The empty pattern matches everything.
#[derive(Clone, Default)]
pub struct LabelWhitelist {
    regex: Option<Regex>,
}

impl LabelWhitelist {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] for an invalid regular expression.
    pub fn new(pattern: &str) -> Result<Self, DiscoveryError> {
        if pattern.is_empty() {
            return Ok(Self::default());
        }
        Regex::new(pattern)
            .map(|regex| Self { regex: Some(regex) })
            .map_err(|e| DiscoveryError::Config(format!("invalid labelWhiteList {pattern:?}: {e}")))
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_ref().map(Regex::as_str).unwrap_or("")
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.as_ref().is_none_or(|re| re.is_match(name))
    }
}

impl PartialEq for LabelWhitelist {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for LabelWhitelist {}

impl fmt::Debug for LabelWhitelist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LabelWhitelist({:?})", self.as_str())
    }
}

impl Serialize for LabelWhitelist {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LabelWhitelist {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Self::new(&pattern).map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Documents
// ─────────────────────────────────────────────────────────────────────────────

/// The `core` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    #[serde(rename = "labelWhiteList")]
    pub label_whitelist: LabelWhitelist,
    pub no_publish: bool,
    /// Interval between discovery passes; zero disables periodic passes.
    #[serde(with = "crate::duration")]
    pub sleep_interval: Duration,
    pub feature_sources: Vec<String>,
    pub label_sources: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            label_whitelist: LabelWhitelist::default(),
            no_publish: false,
            sleep_interval: DEFAULT_SLEEP_INTERVAL,
            feature_sources: vec![ALL_SOURCES.to_string()],
            label_sources: vec![ALL_SOURCES.to_string()],
        }
    }
}

/// A whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    /// Per-source sections, keyed by source name.  Interpreted by the
    /// source's own config type.
    pub sources: BTreeMap<String, Value>,
}

/// Command-line overrides; `None` leaves the merged value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub no_publish: Option<bool>,
    pub feature_sources: Option<Vec<String>>,
    pub label_sources: Option<Vec<String>>,
}

impl CliOverrides {
    fn apply(&self, core: &mut CoreConfig) {
        if let Some(no_publish) = self.no_publish {
            core.no_publish = no_publish;
        }
        if let Some(sources) = &self.feature_sources {
            core.feature_sources = sources.clone();
        }
        if let Some(sources) = &self.label_sources {
            core.label_sources = sources.clone();
        }
    }
}

fn parse_document(text: &str, origin: &str, toml_syntax: bool) -> Result<Value, DiscoveryError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    if toml_syntax {
        let parsed: toml::Value = toml::from_str(text)
            .map_err(|e| DiscoveryError::Config(format!("failed to parse {origin}: {e}")))?;
        serde_yaml::to_value(parsed)
            .map_err(|e| DiscoveryError::Config(format!("failed to convert {origin}: {e}")))
    } else {
        serde_yaml::from_str(text)
            .map_err(|e| DiscoveryError::Config(format!("failed to parse {origin}: {e}")))
    }
}

fn read_config_file(path: &Path) -> Result<Value, DiscoveryError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Value::Null);
        }
        Err(e) => {
            return Err(DiscoveryError::Config(format!(
                "failed to read {}: {e}",
                path.display()
            )));
        }
    };
    let toml_syntax = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    debug!(path = %path.display(), "read config file");
    parse_document(&text, &path.display().to_string(), toml_syntax)
}

/// Merge defaults, the config file, the inline override and CLI overrides
/// into one [`Config`].
///
/// # Errors
///
/// Returns [`DiscoveryError::Config`] when the file or override is malformed
/// or a value has the wrong type.
pub fn load_config(
    path: Option<&Path>,
    override_text: Option<&str>,
    overrides: &CliOverrides,
) -> Result<Config, DiscoveryError> {
    let mut document = serde_yaml::to_value(Config::default())
        .map_err(|e| DiscoveryError::Config(format!("failed to serialise defaults: {e}")))?;

    if let Some(path) = path {
        merge_documents(&mut document, read_config_file(path)?);
    }
    if let Some(text) = override_text {
        merge_documents(&mut document, parse_document(text, "config override", false)?);
    }

    let mut config: Config = serde_yaml::from_value(document)
        .map_err(|e| DiscoveryError::Config(format!("invalid configuration: {e}")))?;
    overrides.apply(&mut config.core);

    let interval = config.core.sleep_interval;
    if !interval.is_zero() && interval < MIN_SLEEP_INTERVAL {
        warn!(
            requested = %crate::duration::format(interval),
            "sleepInterval below one second, raising it to 1s"
        );
        config.core.sleep_interval = MIN_SLEEP_INTERVAL;
    }
    Ok(config)
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a successful [`ConfigEngine::configure`].
#[derive(Clone)]
pub struct EffectiveConfig {
    pub core: CoreConfig,
    /// Enabled detectors, sorted by name.
    pub feature_sources: Vec<Arc<dyn FeatureSource>>,
    /// Enabled label sources, sorted by priority then name.
    pub label_sources: Vec<Arc<dyn LabelSource>>,
}

impl EffectiveConfig {
    pub fn feature_source_names(&self) -> Vec<&str> {
        self.feature_sources.iter().map(|s| s.name()).collect()
    }

    pub fn label_source_names(&self) -> Vec<&str> {
        self.label_sources.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for EffectiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveConfig")
            .field("core", &self.core)
            .field("feature_sources", &self.feature_source_names())
            .field("label_sources", &self.label_source_names())
            .finish()
    }
}

/// Rebuilds the effective configuration from its inputs on demand.
///
/// Rebuilding is all-or-nothing: every source section is validated before
/// any source sees its new configuration.
pub struct ConfigEngine {
    registry: Arc<SourceRegistry>,
    config_file: Option<PathBuf>,
    override_text: Option<String>,
    overrides: CliOverrides,
}

impl ConfigEngine {
    pub fn new(
        registry: Arc<SourceRegistry>,
        config_file: Option<PathBuf>,
        override_text: Option<String>,
        overrides: CliOverrides,
    ) -> Self {
        Self {
            registry,
            config_file,
            override_text,
            overrides,
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Build the effective configuration and push per-source sections to
    /// their sources.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] for a malformed document or a
    /// source section that does not match its source's config type.  No
    /// source configuration is changed in that case.
    pub fn configure(&self) -> Result<EffectiveConfig, DiscoveryError> {
        let config = load_config(
            self.config_file.as_deref(),
            self.override_text.as_deref(),
            &self.overrides,
        )?;
        let prepared = self.prepare_sources(&config.sources)?;

        let feature_names = select_sources(
            &config.core.feature_sources,
            &self.registry.names(Capability::Detector),
            &self.registry,
            "feature",
        );
        let label_names = select_sources(
            &config.core.label_sources,
            &self.registry.names(Capability::LabelProducer),
            &self.registry,
            "label",
        );

        let feature_sources: Vec<Arc<dyn FeatureSource>> = feature_names
            .iter()
            .filter_map(|name| self.registry.feature_source(name).cloned())
            .collect();
        let mut label_sources: Vec<Arc<dyn LabelSource>> = label_names
            .iter()
            .filter_map(|name| self.registry.label_source(name).cloned())
            .collect();
        label_sources.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.name().cmp(b.name()))
        });

        for config in prepared {
            debug!(source = config.source_name(), "applying source configuration");
            config.apply();
        }

        let effective = EffectiveConfig {
            core: config.core,
            feature_sources,
            label_sources,
        };
        info!(
            feature_sources = ?effective.feature_source_names(),
            label_sources = ?effective.label_source_names(),
            whitelist = effective.core.label_whitelist.as_str(),
            sleep_interval = %crate::duration::format(effective.core.sleep_interval),
            no_publish = effective.core.no_publish,
            "configuration applied"
        );
        Ok(effective)
    }

    fn prepare_sources(
        &self,
        sections: &BTreeMap<String, Value>,
    ) -> Result<Vec<PreparedConfig>, DiscoveryError> {
        for name in sections.keys() {
            if self.registry.config_slot(name).is_some() {
                continue;
            }
            if self.registry.source(name).is_some() {
                warn!(source = %name, "source takes no configuration, ignoring its section");
            } else {
                warn!(source = %name, "configuration for unknown source ignored");
            }
        }

        self.registry
            .config_slots()
            .map(|slot| slot.prepare(sections.get(slot.source_name())))
            .collect()
    }
}

/// Expand a requested source list against the sources offering one
/// capability.
///
/// `all` adds every available source not disabled by default, a plain name
/// adds that source, and `-name` removes it after expansion.  Unknown names
/// are logged and ignored.  The result is sorted by name.
pub fn select_sources(
    requested: &[String],
    available: &[&str],
    registry: &SourceRegistry,
    kind: &str,
) -> BTreeSet<String> {
    let mut enabled = BTreeSet::new();
    let mut removed = BTreeSet::new();

    for token in requested.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if token == ALL_SOURCES {
            enabled.extend(
                available
                    .iter()
                    .filter(|name| {
                        registry
                            .source(name)
                            .is_some_and(|source| !source.disabled_by_default())
                    })
                    .map(|name| name.to_string()),
            );
        } else if let Some(name) = token.strip_prefix('-') {
            if !available.contains(&name) {
                warn!(source = name, kind, "cannot disable unknown source");
            }
            removed.insert(name.to_string());
        } else if available.contains(&token) {
            enabled.insert(token.to_string());
        } else {
            warn!(source = token, kind, "unknown source ignored");
        }
    }

    &enabled - &removed
}

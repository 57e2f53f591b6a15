//! Type-erased configuration dispatch for [`ConfigurableSource`]s.
//!
//! Each configurable source is wrapped in a [`ConfigSlot`] when it is
//! registered.  The slot owns the knowledge of the concrete config type and
//! turns an untyped document into a [`PreparedConfig`] that can be applied
//! later.  Preparing every slot before applying any of them lets the config
//! engine reject a bad reconfiguration without touching live sources.

use std::sync::Arc;

use nodelabel_types::DiscoveryError;
use serde_yaml::Value;

use crate::source::ConfigurableSource;

/// Object-safe view of a configurable source.
pub trait ConfigSlot: Send + Sync {
    /// Name of the wrapped source.
    fn source_name(&self) -> &str;

    /// Validate `document` against the source's config type.
    ///
    /// `None` yields a fresh default configuration.  A supplied document is
    /// deep-merged over the default document before deserialisation, so
    /// partial documents only override the keys they name.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] when the document does not match
    /// the config type.
    fn prepare(&self, document: Option<&Value>) -> Result<PreparedConfig, DiscoveryError>;

    /// The configuration currently in effect, as a document.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] if the config cannot be serialised.
    fn current(&self) -> Result<Value, DiscoveryError>;
}

/// A validated configuration waiting to be handed to its source.
pub struct PreparedConfig {
    source_name: String,
    apply: Box<dyn FnOnce() + Send>,
}

impl PreparedConfig {
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Hand the configuration to the source.
    pub fn apply(self) {
        (self.apply)()
    }
}

pub(crate) struct TypedSlot<S: ConfigurableSource> {
    source: Arc<S>,
}

impl<S: ConfigurableSource> TypedSlot<S> {
    pub(crate) fn new(source: Arc<S>) -> Self {
        Self { source }
    }
}

impl<S: ConfigurableSource + 'static> ConfigSlot for TypedSlot<S> {
    fn source_name(&self) -> &str {
        self.source.name()
    }

    fn prepare(&self, document: Option<&Value>) -> Result<PreparedConfig, DiscoveryError> {
        let config = match document {
            None => S::Config::default(),
            Some(document) => {
                let mut merged = serde_yaml::to_value(S::Config::default()).map_err(|e| {
                    DiscoveryError::Config(format!(
                        "failed to serialise default config of source {}: {e}",
                        self.source.name()
                    ))
                })?;
                merge_documents(&mut merged, document.clone());
                serde_yaml::from_value(merged).map_err(|e| {
                    DiscoveryError::Config(format!(
                        "invalid config for source {}: {e}",
                        self.source.name()
                    ))
                })?
            }
        };
        let source = Arc::clone(&self.source);
        Ok(PreparedConfig {
            source_name: self.source.name().to_string(),
            apply: Box::new(move || source.set_config(config)),
        })
    }

    fn current(&self) -> Result<Value, DiscoveryError> {
        serde_yaml::to_value(self.source.config()).map_err(|e| {
            DiscoveryError::Config(format!(
                "failed to serialise config of source {}: {e}",
                self.source.name()
            ))
        })
    }
}

/// Deep-merge `overlay` into `base`.
///
/// Mappings merge key by key; a `null` overlay leaves the base untouched;
/// every other overlay value replaces the base value outright (sequences
/// included).
pub fn merge_documents(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_documents(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

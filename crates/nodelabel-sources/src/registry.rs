//! [`SourceRegistry`] – the table of every discovery plugin in the process.
//!
//! Sources are registered once at startup through a [`SourceEntry`] that
//! records which capabilities the source implements.  After startup the
//! registry is shared read-only (typically behind an `Arc`) with the config
//! engine and the scheduler.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use nodelabel_sources::fake::FakeSource;
//! use nodelabel_sources::registry::{Capability, SourceEntry, SourceRegistry};
//!
//! let fake = Arc::new(FakeSource::new());
//! let mut registry = SourceRegistry::new();
//! registry
//!     .register(
//!         SourceEntry::new(Arc::clone(&fake))
//!             .with_features(Arc::clone(&fake))
//!             .with_labels(Arc::clone(&fake))
//!             .with_config(fake),
//!     )
//!     .unwrap();
//!
//! assert_eq!(registry.names(Capability::LabelProducer), vec!["fake"]);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use nodelabel_types::DiscoveryError;

use crate::config_slot::{ConfigSlot, TypedSlot};
use crate::source::{ConfigurableSource, FeatureSource, LabelSource, Source};

/// Capabilities a registered source may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Produces a raw feature tree.
    Detector,
    /// Produces candidate labels.
    LabelProducer,
    /// Accepts a typed configuration value.
    Configurable,
}

/// Registration record: one source and the capabilities it implements.
pub struct SourceEntry {
    name: String,
    source: Arc<dyn Source>,
    detector: Option<Arc<dyn FeatureSource>>,
    labeler: Option<Arc<dyn LabelSource>>,
    config: Option<Box<dyn ConfigSlot>>,
}

impl SourceEntry {
    /// Start a registration record for `source`.
    pub fn new<S: Source + 'static>(source: Arc<S>) -> Self {
        Self {
            name: source.name().to_string(),
            source,
            detector: None,
            labeler: None,
            config: None,
        }
    }

    /// Declare the detector capability.
    pub fn with_features<S: FeatureSource + 'static>(mut self, source: Arc<S>) -> Self {
        self.detector = Some(source);
        self
    }

    /// Declare the label-producer capability.
    pub fn with_labels<S: LabelSource + 'static>(mut self, source: Arc<S>) -> Self {
        self.labeler = Some(source);
        self
    }

    /// Declare the configurable capability.  The concrete config type is
    /// captured here and erased behind a [`ConfigSlot`].
    pub fn with_config<S: ConfigurableSource + 'static>(mut self, source: Arc<S>) -> Self {
        self.config = Some(Box::new(TypedSlot::new(source)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Detector => self.detector.is_some(),
            Capability::LabelProducer => self.labeler.is_some(),
            Capability::Configurable => self.config.is_some(),
        }
    }

    // Every capability handle must describe the same source.
    fn validate(&self) -> Result<(), DiscoveryError> {
        if self.name.is_empty() {
            return Err(DiscoveryError::Registry(
                "source name must not be empty".to_string(),
            ));
        }
        let names = [
            self.detector.as_ref().map(|s| s.name().to_string()),
            self.labeler.as_ref().map(|s| s.name().to_string()),
            self.config.as_ref().map(|s| s.source_name().to_string()),
        ];
        for other in names.into_iter().flatten() {
            if other != self.name {
                return Err(DiscoveryError::Registry(format!(
                    "capability handle {other:?} does not belong to source {:?}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Process-wide table of discovery plugins.
#[derive(Default)]
pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
    index: HashMap<String, usize>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source under its name.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Registry`] when the name is already taken or
    /// the entry's capability handles disagree on the name.  Both are
    /// programming errors the caller should treat as fatal at startup.
    pub fn register(&mut self, entry: SourceEntry) -> Result<(), DiscoveryError> {
        entry.validate()?;
        if self.index.contains_key(entry.name()) {
            return Err(DiscoveryError::Registry(format!(
                "source {:?} is already registered",
                entry.name()
            )));
        }
        self.index.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every source implementing `capability`, in registration order.
    pub fn all(&self, capability: Capability) -> Vec<&Arc<dyn Source>> {
        self.entries
            .iter()
            .filter(|e| e.has(capability))
            .map(|e| &e.source)
            .collect()
    }

    /// Names of every source implementing `capability`, in registration order.
    pub fn names(&self, capability: Capability) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.has(capability))
            .map(|e| e.name())
            .collect()
    }

    pub fn source(&self, name: &str) -> Option<&Arc<dyn Source>> {
        self.entry(name).map(|e| &e.source)
    }

    pub fn feature_source(&self, name: &str) -> Option<&Arc<dyn FeatureSource>> {
        self.entry(name).and_then(|e| e.detector.as_ref())
    }

    pub fn label_source(&self, name: &str) -> Option<&Arc<dyn LabelSource>> {
        self.entry(name).and_then(|e| e.labeler.as_ref())
    }

    pub fn config_slot(&self, name: &str) -> Option<&dyn ConfigSlot> {
        self.entry(name).and_then(|e| e.config.as_deref())
    }

    /// Every config slot, in registration order.
    pub fn config_slots(&self) -> impl Iterator<Item = &dyn ConfigSlot> {
        self.entries.iter().filter_map(|e| e.config.as_deref())
    }

    fn entry(&self, name: &str) -> Option<&SourceEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }
}

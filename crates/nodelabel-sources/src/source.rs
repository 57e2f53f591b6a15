//! Capability traits every discovery plugin implements.
//!
//! A plugin is a [`Source`] with a stable name.  On top of that it may
//! implement any subset of:
//!
//! - [`FeatureSource`] – produces a raw [`DomainFeatures`] tree on demand.
//! - [`LabelSource`] – produces candidate labels, possibly derived from its
//!   own raw tree.
//! - [`ConfigurableSource`] – accepts and returns a typed configuration value.
//!
//! The rest of the pipeline only ever talks to these traits, so detectors
//! can be added without touching the scheduler or label builder.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use nodelabel_types::{CandidateLabels, DiscoveryError, DomainFeatures};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Base trait: identity of a discovery plugin.
pub trait Source: Send + Sync {
    /// Unique, immutable name, e.g. `"cpu"` or `"local"`.  Used as the
    /// registry key, the label prefix seed and the priority tie-breaker.
    fn name(&self) -> &str;

    /// Sources returning `true` are skipped when `all` is expanded and only
    /// run when named explicitly.
    fn disabled_by_default(&self) -> bool {
        false
    }

    /// Filesystem paths whose modification should trigger an immediate
    /// discovery pass.
    fn watch_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// A detector producing a raw feature tree.
pub trait FeatureSource: Source {
    /// Run discovery and store the result.
    ///
    /// Implementations build the complete new tree before replacing the old
    /// one, so [`features`](Self::features) never observes a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Source`] when discovery cannot complete.
    fn discover(&self) -> Result<(), DiscoveryError>;

    /// Snapshot of the tree produced by the most recent successful
    /// [`discover`](Self::discover).
    fn features(&self) -> DomainFeatures;
}

/// A producer of candidate labels.
pub trait LabelSource: Source {
    /// Candidate `(name, value)` pairs.  Names are either bare or already
    /// namespaced with a `/`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Source`] when labels cannot be derived.
    fn labels(&self) -> Result<CandidateLabels, DiscoveryError>;

    /// Ordering key: label sources run in ascending priority, so a higher
    /// value wins on key collisions.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether bare label names get the `<name>-` prefix.  User-authored
    /// sources opt out so their keys are published as written.
    fn uses_name_prefix(&self) -> bool {
        true
    }
}

/// A source accepting a typed configuration value.
///
/// The associated type is erased by
/// [`SourceEntry::with_config`][crate::registry::SourceEntry::with_config]
/// at registration time, so the config engine never has to know the
/// concrete type.
pub trait ConfigurableSource: Source {
    type Config: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static;

    /// The configuration currently in effect.
    fn config(&self) -> Self::Config;

    /// Replace the configuration.  Called once per (re)configuration.
    fn set_config(&self, config: Self::Config);
}

/// Invoke a source operation, converting a panic into a
/// [`DiscoveryError::Source`] so one misbehaving plugin cannot take down the
/// whole pipeline.
pub fn guarded<T>(
    source_name: &str,
    f: impl FnOnce() -> Result<T, DiscoveryError>,
) -> Result<T, DiscoveryError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(DiscoveryError::source(source_name, format!("panicked: {message}")))
        }
    }
}

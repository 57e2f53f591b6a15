//! `nodelabel-sources` – discovery plugins and the registry that holds them.
//!
//! # Modules
//!
//! - [`source`] – the capability traits ([`Source`], [`FeatureSource`],
//!   [`LabelSource`], [`ConfigurableSource`]) and [`guarded`], which shields
//!   the pipeline from panicking plugins.
//! - [`registry`] – [`SourceRegistry`]: name-keyed table of registered
//!   sources, queried by [`Capability`].
//! - [`config_slot`] – type-erased per-source configuration dispatch.
//! - [`local`] – [`LocalSource`][local::LocalSource]: feature files, the
//!   directive mini-language and deprecated hooks.
//! - [`fake`] – [`FakeSource`][fake::FakeSource]: configurable stand-in,
//!   disabled by default.
//!
//! Hardware probes (CPU, PCI, storage, kernel config, …) plug in the same
//! way: implement the traits and register a [`SourceEntry`].

pub mod config_slot;
pub mod fake;
pub mod local;
pub mod registry;
pub mod source;

use std::sync::Arc;

use nodelabel_types::DiscoveryError;

pub use config_slot::{ConfigSlot, PreparedConfig, merge_documents};
pub use registry::{Capability, SourceEntry, SourceRegistry};
pub use source::{ConfigurableSource, FeatureSource, LabelSource, Source, guarded};

/// Build a registry holding every source shipped with this crate.
///
/// # Errors
///
/// Returns [`DiscoveryError::Registry`] on a name collision, which can only
/// happen through a programming error.
pub fn default_registry() -> Result<SourceRegistry, DiscoveryError> {
    let mut registry = SourceRegistry::new();

    let fake = Arc::new(fake::FakeSource::new());
    registry.register(
        SourceEntry::new(Arc::clone(&fake))
            .with_features(Arc::clone(&fake))
            .with_labels(Arc::clone(&fake))
            .with_config(fake),
    )?;

    let local = Arc::new(local::LocalSource::new());
    registry.register(
        SourceEntry::new(Arc::clone(&local))
            .with_features(Arc::clone(&local))
            .with_labels(Arc::clone(&local))
            .with_config(local),
    )?;

    Ok(registry)
}

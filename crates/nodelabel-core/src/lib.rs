//! `nodelabel-core` – configuration and the discovery-to-label pipeline.
//!
//! # Modules
//!
//! - [`config`] – [`ConfigEngine`][config::ConfigEngine]: merges defaults,
//!   the config file, the inline override and CLI overrides, then selects
//!   the enabled sources and configures each of them.
//! - [`aggregate`] – [`discover_features`][aggregate::discover_features]:
//!   runs every enabled detector, isolating failures.
//! - [`labels`] – [`build_labels`][labels::build_labels]: qualifies,
//!   validates and whitelists candidate labels, resolving collisions by
//!   priority.
//! - [`validation`] – Kubernetes label key and value grammar.
//! - [`duration`] – Go-style duration strings for config documents.

pub mod aggregate;
pub mod config;
pub mod duration;
pub mod labels;
pub mod validation;

pub use aggregate::discover_features;
pub use config::{
    CliOverrides, Config, ConfigEngine, CoreConfig, EffectiveConfig, LabelWhitelist, load_config,
};
pub use labels::build_labels;

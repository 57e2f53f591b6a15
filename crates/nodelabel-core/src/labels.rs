//! The label builder: candidate labels in, final label set out.
//!
//! Label sources are visited in the order they are given (the config engine
//! sorts them by priority, then name).  Every candidate is qualified,
//! validated and filtered on its own; a bad candidate is logged and dropped
//! without affecting its siblings.  Insertion always overwrites, so the
//! last source to produce a key wins.

use std::sync::Arc;

use nodelabel_sources::{LabelSource, guarded};
use nodelabel_types::{DiscoveryError, LabelValue, Labels};
use tracing::{debug, error, warn};

use crate::config::LabelWhitelist;
use crate::validation::{split_key, validate_key, validate_value};

/// Build the final label set from `sources`, in order.
pub fn build_labels(sources: &[Arc<dyn LabelSource>], whitelist: &LabelWhitelist) -> Labels {
    let mut labels = Labels::new();
    for source in sources {
        for (key, value) in source_labels(source.as_ref(), whitelist) {
            if let Some(previous) = labels.insert(key.clone(), value) {
                debug!(
                    label = %key,
                    source = source.name(),
                    previous = %previous,
                    "label overridden by higher-priority source"
                );
            }
        }
    }
    labels
}

/// The accepted labels of a single source.
///
/// A failing (or panicking) source contributes nothing.
pub fn source_labels(source: &dyn LabelSource, whitelist: &LabelWhitelist) -> Labels {
    let name = source.name();
    let candidates = match guarded(name, || source.labels()) {
        Ok(candidates) => candidates,
        Err(e) => {
            error!(source = name, error = %e, "failed to get labels");
            return Labels::new();
        }
    };

    let mut accepted = Labels::new();
    for (candidate, value) in candidates {
        let key = qualify(source, &candidate);
        match accept(&key, &value, whitelist) {
            Ok(true) => {
                accepted.insert(key, value.to_string());
            }
            Ok(false) => debug!(label = %key, source = name, "label not in whitelist, skipping"),
            Err(e) => warn!(source = name, error = %e, "skipping invalid label"),
        }
    }
    accepted
}

/// Fully-qualified key for a candidate name.
///
/// Namespaced names are used as given; bare names get the `<source>-`
/// prefix unless the source opts out.
pub fn qualify(source: &dyn LabelSource, candidate: &str) -> String {
    if candidate.contains('/') || !source.uses_name_prefix() {
        candidate.to_string()
    } else {
        format!("{}-{}", source.name(), candidate)
    }
}

fn accept(key: &str, value: &LabelValue, whitelist: &LabelWhitelist) -> Result<bool, DiscoveryError> {
    validate_key(key)?;
    validate_value(key, &value.to_string())?;
    let (_, name) = split_key(key);
    Ok(whitelist.is_match(name))
}

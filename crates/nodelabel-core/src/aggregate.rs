//! The feature aggregator: runs every enabled detector in turn.

use std::sync::Arc;

use nodelabel_sources::{FeatureSource, guarded};
use nodelabel_types::Features;
use tracing::{debug, error};

/// Run `discover` on each source, in order, and collect the trees.
///
/// A source that fails or panics is logged and left out of the result; the
/// remaining sources still run.
pub fn discover_features(sources: &[Arc<dyn FeatureSource>]) -> Features {
    let mut features = Features::new();
    for source in sources {
        let name = source.name();
        debug!(source = name, "running discovery");
        let result = guarded(name, || {
            source.discover()?;
            Ok(source.features())
        });
        match result {
            Ok(tree) => {
                features.insert(name.to_string(), tree);
            }
            Err(e) => error!(source = name, error = %e, "feature discovery failed"),
        }
    }
    features
}

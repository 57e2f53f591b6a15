//! The `fake` source: a configurable stand-in for real hardware probes.
//!
//! It reports whatever its configuration says, which makes it useful for
//! demos, smoke tests and CI clusters without interesting hardware.  It is
//! disabled by default, so `all` never selects it; name it explicitly to
//! enable it.
//!
//! ```yaml
//! core:
//!   featureSources: [all, fake]
//!   labelSources: [all, fake]
//! sources:
//!   fake:
//!     labels:
//!       fakefeature1: "true"
//!     flagFeatures: [flag_1]
//!     attributeFeatures:
//!       attr_1: "true"
//!     instanceFeatures:
//!       - name: instance_1
//! ```

use std::collections::BTreeMap;

use nodelabel_types::{CandidateLabels, DiscoveryError, DomainFeatures, InstanceFeature, LabelValue};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::source::{ConfigurableSource, FeatureSource, LabelSource, Source};

/// Registry name of the fake source.
pub const NAME: &str = "fake";

/// Configuration of the fake source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FakeConfig {
    pub labels: BTreeMap<String, String>,
    pub flag_features: Vec<String>,
    pub attribute_features: BTreeMap<String, String>,
    pub instance_features: Vec<BTreeMap<String, String>>,
}

fn pairs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            labels: pairs(&[
                ("fakefeature1", "true"),
                ("fakefeature2", "true"),
                ("fakefeature3", "true"),
            ]),
            flag_features: vec!["flag_1".into(), "flag_2".into(), "flag_3".into()],
            attribute_features: pairs(&[("attr_1", "true"), ("attr_2", "false"), ("attr_3", "10")]),
            instance_features: vec![
                pairs(&[("name", "instance_1"), ("attr_1", "true"), ("attr_2", "false")]),
                pairs(&[("name", "instance_2"), ("attr_1", "false"), ("attr_2", "true")]),
            ],
        }
    }
}

/// Source reporting the features and labels it is configured with.
pub struct FakeSource {
    config: RwLock<FakeConfig>,
    features: RwLock<DomainFeatures>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            config: RwLock::new(FakeConfig::default()),
            features: RwLock::new(DomainFeatures::default()),
        }
    }
}

impl Default for FakeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for FakeSource {
    fn name(&self) -> &str {
        NAME
    }

    fn disabled_by_default(&self) -> bool {
        true
    }
}

impl FeatureSource for FakeSource {
    fn discover(&self) -> Result<(), DiscoveryError> {
        let config = self.config.read().clone();
        let features = DomainFeatures {
            flags: config.flag_features.into_iter().collect(),
            attributes: config.attribute_features,
            instances: config
                .instance_features
                .into_iter()
                .map(InstanceFeature::new)
                .collect(),
        };
        *self.features.write() = features;
        Ok(())
    }

    fn features(&self) -> DomainFeatures {
        self.features.read().clone()
    }
}

impl LabelSource for FakeSource {
    fn labels(&self) -> Result<CandidateLabels, DiscoveryError> {
        Ok(self
            .config
            .read()
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), LabelValue::Str(v.clone())))
            .collect())
    }
}

impl ConfigurableSource for FakeSource {
    type Config = FakeConfig;

    fn config(&self) -> FakeConfig {
        self.config.read().clone()
    }

    fn set_config(&self, config: FakeConfig) {
        *self.config.write() = config;
    }
}

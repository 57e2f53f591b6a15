//! Parser for feature files and hook output.
//!
//! Input is read line by line:
//!
//! | Line | Meaning |
//! |---|---|
//! | blank | ignored |
//! | `# +expiry-time=<RFC3339>` | sets the expiry gate for every following line |
//! | `# +no-feature` | the next data line is removed from the raw features |
//! | `# +no-label` | the next data line is removed from the labels |
//! | `key` | `key=true` |
//! | `key=value` | upsert into both raw features and labels |
//!
//! The expiry gate persists until another `expiry-time` directive or the end
//! of the input.  The two skip flags are single-use: they are consumed by the
//! very next data line, whichever branch it takes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nodelabel_types::DiscoveryError;
use tracing::{debug, error};

/// Prefix marking a directive line.
pub const DIRECTIVE_PREFIX: &str = "# +";

const EXPIRY_TIME: &str = "expiry-time";
const NO_LABEL: &str = "no-label";
const NO_FEATURE: &str = "no-feature";

/// Raw features and labels produced by one parse pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeatures {
    pub features: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl ParsedFeatures {
    /// Fold `other` into `self`.  Keys already present are overwritten and
    /// the collision is logged against `origin`.
    pub fn absorb(&mut self, other: ParsedFeatures, origin: &str) {
        for (key, value) in other.features {
            if self.features.insert(key.clone(), value).is_some() {
                debug!(origin, key = %key, "feature overridden by later file");
            }
        }
        for (key, value) in other.labels {
            if self.labels.insert(key.clone(), value).is_some() {
                debug!(origin, key = %key, "label overridden by later file");
            }
        }
    }
}

// Scoped to a single parse pass.
#[derive(Debug, Default)]
struct ParsingState {
    expiry: Option<DateTime<Utc>>,
    skip_label: bool,
    skip_feature: bool,
}

impl ParsingState {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

/// Parse `lines` read from `origin` (a file or hook name), evaluating the
/// expiry gate against `now`.
pub fn parse_features<'a, I>(lines: I, origin: &str, now: DateTime<Utc>) -> ParsedFeatures
where
    I: IntoIterator<Item = &'a str>,
{
    let mut parsed = ParsedFeatures::default();
    let mut state = ParsingState::default();

    for raw in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(directive) = line.strip_prefix(DIRECTIVE_PREFIX) {
            if let Err(e) = apply_directive(directive, &mut state) {
                error!(origin, error = %e, "failed to parse directive");
            }
            continue;
        }

        if state.expired(now) {
            debug!(origin, line, "entry expired, skipping");
            continue;
        }

        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (line.to_string(), "true".to_string()),
        };

        if state.skip_feature {
            parsed.features.remove(&key);
        } else {
            parsed.features.insert(key.clone(), value.clone());
        }
        if state.skip_label {
            parsed.labels.remove(&key);
        } else {
            parsed.labels.insert(key, value);
        }

        state.skip_feature = false;
        state.skip_label = false;
    }

    parsed
}

fn apply_directive(directive: &str, state: &mut ParsingState) -> Result<(), DiscoveryError> {
    let (key, value) = match directive.split_once('=') {
        Some((key, value)) => (key.trim(), Some(value.trim())),
        None => (directive.trim(), None),
    };

    match key {
        EXPIRY_TIME => {
            let value = value.ok_or_else(|| {
                DiscoveryError::source(super::NAME, "expiry-time directive requires a value")
            })?;
            let expiry = DateTime::parse_from_rfc3339(value).map_err(|e| {
                DiscoveryError::source(super::NAME, format!("invalid expiry-time {value:?}: {e}"))
            })?;
            state.expiry = Some(expiry.with_timezone(&Utc));
        }
        NO_LABEL => state.skip_label = true,
        NO_FEATURE => state.skip_feature = true,
        unknown => {
            return Err(DiscoveryError::source(
                super::NAME,
                format!("unknown directive {unknown:?}"),
            ));
        }
    }
    Ok(())
}

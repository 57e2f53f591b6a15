//! Kubernetes label grammar.
//!
//! | Part            | Rule                                                        |
//! |-----------------|-------------------------------------------------------------|
//! | namespace       | optional, DNS-1123 subdomain, at most 253 characters         |
//! | name            | 1–63 characters, alphanumeric at both ends, `-_.` inside     |
//! | value           | 0–63 characters, same character rules as the name           |
//!
//! Both checks return [`DiscoveryError::InvalidLabel`] so the label builder
//! can log the offending candidate and move on.

use nodelabel_types::DiscoveryError;
use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_NAME_LENGTH: usize = 63;
pub const MAX_VALUE_LENGTH: usize = 63;
pub const MAX_NAMESPACE_LENGTH: usize = 253;

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("static regex")
});

static VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").expect("static regex")
});

static SUBDOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("static regex")
});

fn invalid(name: &str, details: impl Into<String>) -> DiscoveryError {
    DiscoveryError::InvalidLabel {
        name: name.to_string(),
        details: details.into(),
    }
}

/// Split a label key into `(namespace, name)`.
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((namespace, name)) => (Some(namespace), name),
        None => (None, key),
    }
}

/// Check a fully-qualified label key (`[namespace/]name`).
pub fn validate_key(key: &str) -> Result<(), DiscoveryError> {
    if key.matches('/').count() > 1 {
        return Err(invalid(key, "a label key may contain at most one '/'"));
    }
    let (namespace, name) = split_key(key);

    if let Some(namespace) = namespace {
        if namespace.is_empty() {
            return Err(invalid(key, "namespace part must not be empty"));
        }
        if namespace.len() > MAX_NAMESPACE_LENGTH {
            return Err(invalid(
                key,
                format!("namespace part must be at most {MAX_NAMESPACE_LENGTH} characters"),
            ));
        }
        if !SUBDOMAIN_RE.is_match(namespace) {
            return Err(invalid(
                key,
                "namespace part must be a lowercase DNS-1123 subdomain",
            ));
        }
    }

    if name.is_empty() {
        return Err(invalid(key, "name part must not be empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid(
            key,
            format!("name part must be at most {MAX_NAME_LENGTH} characters"),
        ));
    }
    if !NAME_RE.is_match(name) {
        return Err(invalid(
            key,
            "name part must start and end with an alphanumeric character and contain only [-_.A-Za-z0-9]",
        ));
    }
    Ok(())
}

/// Check a label value; `key` is only used for the error.
pub fn validate_value(key: &str, value: &str) -> Result<(), DiscoveryError> {
    if value.len() > MAX_VALUE_LENGTH {
        return Err(invalid(
            key,
            format!("value {value:?} must be at most {MAX_VALUE_LENGTH} characters"),
        ));
    }
    if !VALUE_RE.is_match(value) {
        return Err(invalid(
            key,
            format!("value {value:?} must be empty or start and end with an alphanumeric character"),
        ));
    }
    Ok(())
}

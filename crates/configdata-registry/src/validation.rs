//! Field validation for `ConfigResource` objects.

use crate::error::FieldViolation;
use crate::model::ConfigResource;
use regex::Regex;
use std::sync::LazyLock;

const DNS1123_LABEL_MAX: usize = 63;
const DNS1123_SUBDOMAIN_MAX: usize = 253;
const CONFIG_KEY_MAX: usize = 253;

static RE_DNS1123_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());
static RE_DNS1123_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});
static RE_CONFIG_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-._a-zA-Z0-9]+$").unwrap());

/// Returns true if `value` is a DNS-1123 label (namespaces).
pub fn is_dns1123_label(value: &str) -> bool {
    value.len() <= DNS1123_LABEL_MAX && RE_DNS1123_LABEL.is_match(value)
}

/// Returns true if `value` is a DNS-1123 subdomain (object names).
pub fn is_dns1123_subdomain(value: &str) -> bool {
    value.len() <= DNS1123_SUBDOMAIN_MAX && RE_DNS1123_SUBDOMAIN.is_match(value)
}

/// Checks one data key. Returns the reason it is rejected, if any.
pub fn check_config_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("must not be empty".to_string());
    }
    if key.len() > CONFIG_KEY_MAX {
        return Some(format!("must be no more than {CONFIG_KEY_MAX} characters"));
    }
    if !RE_CONFIG_KEY.is_match(key) {
        return Some("must consist of alphanumeric characters, '-', '_' or '.'".to_string());
    }
    if key == "." || key == ".." {
        return Some("must not be '.' or '..'".to_string());
    }
    if key.starts_with("..") {
        return Some("must not start with '..'".to_string());
    }
    None
}

/// Validates object metadata and every data key.
///
/// All violations are collected so callers see the full picture at once.
pub fn validate_config_resource(resource: &ConfigResource) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    let meta = &resource.metadata;

    if meta.name.is_empty() {
        if meta.generate_name.is_empty() {
            violations.push(FieldViolation::required(
                "metadata.name",
                "name or generateName is required",
            ));
        }
    } else if meta.name.len() > DNS1123_SUBDOMAIN_MAX {
        violations.push(FieldViolation::too_long(
            "metadata.name",
            &meta.name,
            DNS1123_SUBDOMAIN_MAX,
        ));
    } else if !is_dns1123_subdomain(&meta.name) {
        violations.push(FieldViolation::invalid(
            "metadata.name",
            &meta.name,
            "must be a lowercase DNS-1123 subdomain",
        ));
    }

    if meta.namespace.is_empty() {
        violations.push(FieldViolation::required("metadata.namespace", "namespace is required"));
    } else if !is_dns1123_label(&meta.namespace) {
        violations.push(FieldViolation::invalid(
            "metadata.namespace",
            &meta.namespace,
            "must be a lowercase DNS-1123 label",
        ));
    }

    for key in resource.data.keys() {
        if let Some(reason) = check_config_key(key) {
            violations.push(FieldViolation::invalid(format!("data[{key}]"), key, reason));
        }
    }

    violations
}

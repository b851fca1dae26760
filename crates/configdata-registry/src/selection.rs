//! # Selection
//!
//! Label and field selectors, and the [`Matcher`] capability List and Watch use
//! to filter objects. A kind opts in by implementing [`Selectable`], which
//! exposes its labels and a small derived field set; [`SelectionPredicate`]
//! then works for any such kind.
//!
//! Label selector grammar (comma separated, all must hold):
//!
//! | Form | Meaning |
//! |------|---------|
//! | `k=v`, `k==v` | label `k` is present and equals `v` |
//! | `k!=v` | label `k` is absent or differs from `v` |
//! | `k` | label `k` is present |
//! | `!k` | label `k` is absent |
//!
//! Field selectors accept `=`, `==` and `!=` only.

use crate::error::{FieldViolation, RegistryError};
use crate::model::{ConfigResource, ListOptions};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A typed predicate over objects of kind `T`.
pub trait Matcher<T>: Send + Sync {
    fn matches(&self, object: &T) -> bool;
}

/// An object that exposes labels and a derived field set for selection.
pub trait Selectable {
    fn labels(&self) -> &BTreeMap<String, String>;

    /// Value of a selectable field, or `None` if the kind has no such field.
    fn field(&self, path: &str) -> Option<&str>;
}

impl Selectable for ConfigResource {
    fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    fn field(&self, path: &str) -> Option<&str> {
        match path {
            "metadata.name" => Some(self.name()),
            "metadata.namespace" => Some(self.namespace()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRequirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl LabelRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(key, value) => labels.get(key) == Some(value),
            Self::NotEquals(key, value) => labels.get(key) != Some(value),
            Self::Exists(key) => labels.contains_key(key),
            Self::NotExists(key) => !labels.contains_key(key),
        }
    }
}

impl fmt::Display for LabelRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(k, v) => write!(f, "{k}={v}"),
            Self::NotEquals(k, v) => write!(f, "{k}!={v}"),
            Self::Exists(k) => write!(f, "{k}"),
            Self::NotExists(k) => write!(f, "!{k}"),
        }
    }
}

fn selector_error(field: &str, raw: &str, detail: impl Into<String>) -> RegistryError {
    RegistryError::invalid("", vec![FieldViolation::invalid(field, raw, detail)])
}

fn valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

/// Splits `k op v` on the first operator. `==` is checked before `=`.
fn split_operator(term: &str) -> Option<(&str, &'static str, &str)> {
    for op in ["!=", "==", "="] {
        if let Some((key, value)) = term.split_once(op) {
            return Some((key.trim(), op, value.trim()));
        }
    }
    None
}

fn terms(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim)
}

/// Conjunction of label requirements. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[LabelRequirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = RegistryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().is_empty() {
            return Ok(Self::everything());
        }
        let mut requirements = Vec::new();
        for term in terms(raw) {
            let requirement = match split_operator(term) {
                Some((key, op, value)) => {
                    if !valid_token(key) {
                        return Err(selector_error("labelSelector", raw, format!("invalid label key {key:?}")));
                    }
                    if !value.is_empty() && !valid_token(value) {
                        return Err(selector_error("labelSelector", raw, format!("invalid label value {value:?}")));
                    }
                    if op == "!=" {
                        LabelRequirement::NotEquals(key.to_string(), value.to_string())
                    } else {
                        LabelRequirement::Equals(key.to_string(), value.to_string())
                    }
                }
                None => match term.strip_prefix('!') {
                    Some(key) if valid_token(key.trim()) => {
                        LabelRequirement::NotExists(key.trim().to_string())
                    }
                    None if valid_token(term) => LabelRequirement::Exists(term.to_string()),
                    _ => {
                        return Err(selector_error("labelSelector", raw, format!("cannot parse term {term:?}")));
                    }
                },
            };
            requirements.push(requirement);
        }
        Ok(Self { requirements })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRequirement {
    pub field: String,
    pub value: String,
    pub negated: bool,
}

/// Conjunction of field requirements. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[FieldRequirement] {
        &self.requirements
    }

    /// A requirement on a field the object does not expose never matches.
    pub fn matches<T: Selectable + ?Sized>(&self, object: &T) -> bool {
        self.requirements.iter().all(|r| match object.field(&r.field) {
            Some(actual) => (actual == r.value) != r.negated,
            None => false,
        })
    }
}

impl FromStr for FieldSelector {
    type Err = RegistryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().is_empty() {
            return Ok(Self::everything());
        }
        let mut requirements = Vec::new();
        for term in terms(raw) {
            let Some((field, op, value)) = split_operator(term) else {
                return Err(selector_error("fieldSelector", raw, format!("cannot parse term {term:?}")));
            };
            if field.is_empty() {
                return Err(selector_error("fieldSelector", raw, "field name is empty"));
            }
            requirements.push(FieldRequirement {
                field: field.to_string(),
                value: value.to_string(),
                negated: op == "!=",
            });
        }
        Ok(Self { requirements })
    }
}

/// Label and field selectors combined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPredicate {
    pub label: LabelSelector,
    pub field: FieldSelector,
}

impl SelectionPredicate {
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parses the selectors carried by List/Watch options.
    pub fn from_options(options: &ListOptions) -> Result<Self, RegistryError> {
        Ok(Self {
            label: options.label_selector.parse()?,
            field: options.field_selector.parse()?,
        })
    }

    pub fn is_everything(&self) -> bool {
        self.label.is_empty() && self.field.is_empty()
    }
}

impl<T: Selectable> Matcher<T> for SelectionPredicate {
    fn matches(&self, object: &T) -> bool {
        self.label.matches(object.labels()) && self.field.matches(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> ConfigResource {
        ConfigResource::new("default", "cfg1")
            .with_label("app", "web")
            .with_label("tier", "frontend")
    }

    fn matches(label: &str, field: &str) -> bool {
        let options = ListOptions::everything().with_labels(label).with_fields(field);
        SelectionPredicate::from_options(&options)
            .unwrap()
            .matches(&resource())
    }

    #[test]
    fn test_empty_selectors_match_everything() {
        assert!(matches("", ""));
        assert!(SelectionPredicate::everything().is_everything());
    }

    #[test]
    fn test_label_operators() {
        assert!(matches("app=web", ""));
        assert!(matches("app==web", ""));
        assert!(!matches("app=api", ""));
        assert!(matches("app!=api", ""));
        assert!(matches("missing!=x", ""));
        assert!(matches("tier", ""));
        assert!(!matches("missing", ""));
        assert!(matches("!missing", ""));
        assert!(!matches("!app", ""));
        assert!(matches("app=web, tier=frontend", ""));
        assert!(!matches("app=web,tier=backend", ""));
    }

    #[test]
    fn test_field_selectors() {
        assert!(matches("", "metadata.name=cfg1"));
        assert!(matches("", "metadata.namespace==default"));
        assert!(!matches("", "metadata.name!=cfg1"));
        assert!(matches("", "metadata.name!=other"));
        // Unknown fields never match, whatever the operator.
        assert!(!matches("", "spec.replicas=1"));
        assert!(!matches("", "spec.replicas!=1"));
    }

    #[test]
    fn test_parse_errors_are_invalid() {
        let err = "app=we b".parse::<LabelSelector>().unwrap_err();
        assert!(matches!(err, RegistryError::Invalid { .. }));
        assert!("=web".parse::<LabelSelector>().is_err());
        assert!("metadata.name".parse::<FieldSelector>().is_err());
    }

    #[test]
    fn test_label_selector_display() {
        let selector: LabelSelector = "app=web,!legacy,tier".parse().unwrap();
        assert_eq!(selector.to_string(), "app=web,!legacy,tier");
        assert_eq!(selector.requirements().len(), 3);
    }
}

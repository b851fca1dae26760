//! # Registry Errors
//!
//! Every registry operation reports failures through [`RegistryError`]. The
//! registry never retries on its own; callers decide what to do, usually by
//! looking at [`RegistryError::is_retryable`].

use std::fmt;

/// What kind of rule a field violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Required,
    Invalid,
    TooLong,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub kind: ViolationKind,
    pub value: String,
    pub detail: String,
}

impl FieldViolation {
    pub fn required(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: ViolationKind::Required,
            value: String::new(),
            detail: detail.into(),
        }
    }

    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            kind: ViolationKind::Invalid,
            value: value.into(),
            detail: detail.into(),
        }
    }

    pub fn too_long(field: impl Into<String>, value: impl Into<String>, max: usize) -> Self {
        Self {
            field: field.into(),
            kind: ViolationKind::TooLong,
            value: value.into(),
            detail: format!("must be no more than {max} characters"),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::Required => write!(f, "{}: Required value: {}", self.field, self.detail),
            ViolationKind::Invalid => write!(
                f,
                "{}: Invalid value: {:?}: {}",
                self.field, self.value, self.detail
            ),
            ViolationKind::TooLong => write!(
                f,
                "{}: Too long: {:?}: {}",
                self.field, self.value, self.detail
            ),
        }
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by the registry and its client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("configresource \"{name}\" not found in namespace \"{namespace}\"")]
    NotFound { namespace: String, name: String },

    #[error("configresource \"{name}\" already exists in namespace \"{namespace}\"")]
    AlreadyExists { namespace: String, name: String },

    #[error("conflict on configresource \"{name}\": {reason}")]
    Conflict { name: String, reason: String },

    #[error("configresource \"{name}\" is invalid: {}", join_violations(.violations))]
    Invalid {
        name: String,
        violations: Vec<FieldViolation>,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal store error: {0}")]
    Internal(String),

    /// The watch start point was compacted away or the subscriber fell behind.
    /// `oldest` is the first revision that can still be delivered.
    #[error("resync required: version {requested} is older than the retained history (oldest {oldest})")]
    ResyncRequired { requested: u64, oldest: u64 },

    /// The registry endpoint closed or dropped the response.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    pub fn not_found(namespace: &str, name: &str) -> Self {
        Self::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn invalid(name: &str, violations: Vec<FieldViolation>) -> Self {
        Self::Invalid {
            name: name.to_string(),
            violations,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if the same request may succeed when tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Internal(_) | Self::Unavailable(_)
        )
    }
}

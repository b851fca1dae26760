//! # Create / Update Strategy
//!
//! Pure policy applied by the [`Registry`](crate::registry::Registry) around
//! every write: how objects are prepared, validated and named, and whether an
//! update with a stale `resourceVersion` may overwrite the stored object.

use crate::error::{FieldViolation, RegistryError};
use crate::model::ConfigResource;
use crate::validation::validate_config_resource;
use std::sync::Arc;

/// Number of random characters appended to a `generateName` prefix.
const RANDOM_SUFFIX_LEN: usize = 5;

/// Produces object names from a caller-supplied prefix.
pub trait NameGenerator: Send + Sync {
    fn generate_name(&self, prefix: &str) -> String;
}

/// Appends five random lowercase alphanumerics to the prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleNameGenerator;

impl NameGenerator for SimpleNameGenerator {
    fn generate_name(&self, prefix: &str) -> String {
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("{prefix}{}", &random[..RANDOM_SUFFIX_LEN])
    }
}

/// Write policy for `ConfigResource`.
#[derive(Clone)]
pub struct Strategy {
    allow_unconditional_update: bool,
    names: Arc<dyn NameGenerator>,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("allow_unconditional_update", &self.allow_unconditional_update)
            .finish_non_exhaustive()
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Strategy {
    pub fn new(allow_unconditional_update: bool) -> Self {
        Self {
            allow_unconditional_update,
            names: Arc::new(SimpleNameGenerator),
        }
    }

    /// Replaces the name generator.
    pub fn with_name_generator(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.names = names;
        self
    }

    pub fn namespace_scoped(&self) -> bool {
        true
    }

    pub fn allow_create_on_update(&self) -> bool {
        false
    }

    pub fn allow_unconditional_update(&self) -> bool {
        self.allow_unconditional_update
    }

    /// Clears fields the store owns before a create.
    pub fn prepare_for_create(&self, resource: &mut ConfigResource) {
        resource.metadata.resource_version.clear();
    }

    /// Fills in `metadata.name` from `generateName` when the name is empty.
    pub fn assign_generated_name(&self, resource: &mut ConfigResource) {
        if resource.metadata.name.is_empty() && !resource.metadata.generate_name.is_empty() {
            resource.metadata.name = self.names.generate_name(&resource.metadata.generate_name);
        }
    }

    pub fn validate(&self, resource: &ConfigResource) -> Vec<FieldViolation> {
        validate_config_resource(resource)
    }

    /// Updates replace the whole object, so nothing is carried over from `old`.
    pub fn prepare_for_update(&self, _new: &mut ConfigResource, _old: &ConfigResource) {}

    /// Re-validates the complete new object.
    pub fn validate_update(
        &self,
        new: &ConfigResource,
        _old: &ConfigResource,
    ) -> Vec<FieldViolation> {
        let mut violations = validate_config_resource(new);
        if new.metadata.resource_version.is_empty() && !self.allow_unconditional_update {
            violations.push(FieldViolation::required(
                "metadata.resourceVersion",
                "must be specified for an update",
            ));
        }
        violations
    }

    /// Turns an `AlreadyExists` on a generated name into a retryable conflict.
    /// Every other error is returned unchanged.
    pub fn check_generated_name_error(
        &self,
        err: RegistryError,
        resource: &ConfigResource,
    ) -> RegistryError {
        match err {
            RegistryError::AlreadyExists { name, .. }
                if !resource.metadata.generate_name.is_empty() =>
            {
                RegistryError::Conflict {
                    name,
                    reason: format!(
                        "generated name from prefix {:?} collided, try again later",
                        resource.metadata.generate_name
                    ),
                }
            }
            other => other,
        }
    }
}

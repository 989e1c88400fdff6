use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::domain::policy::Policy;

/// Errors that can occur during policy loading and publication.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown policy version: {0}")]
    UnknownVersion(String),
}

/// Load a policy from a YAML file.
pub fn load_policy(path: impl AsRef<Path>) -> Result<Policy, PolicyError> {
    let content = fs::read_to_string(path)?;
    let policy: Policy = serde_yaml::from_str(&content)?;

    validate_policy(&policy)?;

    Ok(policy)
}

/// Validate a policy before it becomes active.
pub fn validate_policy(policy: &Policy) -> Result<(), PolicyError> {
    if policy.version.is_empty() {
        return Err(PolicyError::Validation(
            "Policy version cannot be empty".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for rule in &policy.rules {
        if rule.id.is_empty() {
            return Err(PolicyError::Validation(
                "Rule id cannot be empty".to_string(),
            ));
        }
        if !seen_ids.insert(&rule.id) {
            return Err(PolicyError::Validation(format!(
                "Duplicate rule ID: {}",
                rule.id
            )));
        }
        if rule.resource_type.is_empty() {
            return Err(PolicyError::Validation(format!(
                "Rule {} has an empty resource type",
                rule.id
            )));
        }
    }

    Ok(())
}

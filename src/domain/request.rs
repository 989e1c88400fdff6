use ahash::AHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use super::attributes::{keys, AttributeCategory, AttributeSet, AttributeValue};

/// An access request: one attribute set per category, frozen at build time.
///
/// Requests are immutable once built; the engine and cache rely on that for
/// the fingerprint staying valid across the evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRequest {
    pub subject: AttributeSet,
    pub resource: AttributeSet,
    pub action: AttributeSet,
    pub environment: AttributeSet,
}

impl AccessRequest {
    pub fn builder() -> AccessRequestBuilder {
        AccessRequestBuilder::default()
    }

    pub fn category(&self, category: AttributeCategory) -> &AttributeSet {
        match category {
            AttributeCategory::Subject => &self.subject,
            AttributeCategory::Resource => &self.resource,
            AttributeCategory::Action => &self.action,
            AttributeCategory::Environment => &self.environment,
        }
    }

    /// Look up a namespaced key like `"subject.role"`.
    pub fn lookup(&self, namespaced: &str) -> Option<&AttributeValue> {
        let (category, key) = AttributeCategory::split(namespaced)?;
        self.category(category).get(key)
    }

    /// The resource classification, required by every policy lookup.
    pub fn resource_type(&self) -> Option<&str> {
        self.resource.get_str(keys::RESOURCE_TYPE)
    }

    pub fn action_type(&self) -> Option<&str> {
        self.action.get_str(keys::ACTION_TYPE)
    }

    /// Stable 64-bit fingerprint over the canonical ordering of all four
    /// attribute sets, used as the decision cache key.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = AHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Immutable builder for [`AccessRequest`].
///
/// Each step consumes and returns the builder, so partially built requests
/// are never aliased; the request only exists once `build` freezes it.
#[derive(Debug, Clone, Default)]
pub struct AccessRequestBuilder {
    subject: AttributeSet,
    resource: AttributeSet,
    action: AttributeSet,
    environment: AttributeSet,
}

impl AccessRequestBuilder {
    /// Target a patient record: sets `resource.type` and `resource.patientId`.
    pub fn for_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.resource.insert(keys::RESOURCE_TYPE, "patient");
        self.resource.insert(keys::PATIENT_ID, patient_id.into());
        self
    }

    /// Target a medical record: sets `resource.type` and `resource.recordId`.
    pub fn for_medical_record(mut self, record_id: impl Into<String>) -> Self {
        self.resource.insert(keys::RESOURCE_TYPE, "medical_record");
        self.resource.insert(keys::RECORD_ID, record_id.into());
        self
    }

    /// Set the free-text action type.
    pub fn action(mut self, action_type: impl Into<String>) -> Self {
        self.action.insert(keys::ACTION_TYPE, action_type.into());
        self
    }

    /// Flag the resource as being accessed under emergency conditions.
    pub fn emergency(mut self, emergency: bool) -> Self {
        self.resource.insert(keys::IS_EMERGENCY, emergency);
        self
    }

    pub fn subject_attr(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.subject.insert(key, value);
        self
    }

    pub fn resource_attr(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.resource.insert(key, value);
        self
    }

    pub fn environment_attr(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.environment.insert(key, value);
        self
    }

    /// Replace the whole subject attribute set (requester context from the
    /// surrounding security layer).
    pub fn subject_set(mut self, subject: AttributeSet) -> Self {
        self.subject = subject;
        self
    }

    pub fn build(self) -> AccessRequest {
        AccessRequest {
            subject: self.subject,
            resource: self.resource,
            action: self.action,
            environment: self.environment,
        }
    }
}

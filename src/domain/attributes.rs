use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Well-known attribute keys used by the built-in policy vocabulary.
///
/// Policies are free to reference any key; these constants only cover the
/// ones the engine and orchestrator produce themselves.
pub mod keys {
    /// Resource classification, required on every request.
    pub const RESOURCE_TYPE: &str = "type";
    /// Free-text action type (read, write, export, erase, ...).
    pub const ACTION_TYPE: &str = "type";
    pub const USER_ID: &str = "userId";
    pub const ROLE: &str = "role";
    pub const PATIENT_ID: &str = "patientId";
    pub const DOCTOR_ID: &str = "doctorId";
    pub const DEPARTMENT_ID: &str = "departmentId";
    pub const RECORD_ID: &str = "recordId";
    pub const ASSIGNED_DOCTORS: &str = "assignedDoctors";
    pub const IS_EMERGENCY: &str = "isEmergency";
    pub const CURRENT_HOUR: &str = "currentHour";
    pub const DAY_OF_WEEK: &str = "dayOfWeek";
    pub const IS_WEEKEND: &str = "isWeekend";
    pub const IS_BUSINESS_HOURS: &str = "isBusinessHours";
    pub const IS_EMERGENCY_HOURS: &str = "isEmergencyHours";
}

/// One of the four independent attribute categories of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeCategory {
    Subject,
    Resource,
    Action,
    Environment,
}

impl AttributeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeCategory::Subject => "subject",
            AttributeCategory::Resource => "resource",
            AttributeCategory::Action => "action",
            AttributeCategory::Environment => "environment",
        }
    }

    /// Split a namespaced key like `"subject.role"` into category and local key.
    pub fn split(namespaced: &str) -> Option<(AttributeCategory, &str)> {
        let (prefix, key) = namespaced.split_once('.')?;
        let category = match prefix {
            "subject" => AttributeCategory::Subject,
            "resource" => AttributeCategory::Resource,
            "action" => AttributeCategory::Action,
            "environment" => AttributeCategory::Environment,
            _ => return None,
        };
        Some((category, key))
    }
}

impl fmt::Display for AttributeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attribute value.
///
/// Attribute sources are schema-less key/value stores; the tagged union keeps
/// that flexibility while giving conditions typed comparisons. Untagged serde
/// lets policy files write plain scalars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Set(BTreeSet<String>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            AttributeValue::Set(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Str(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Str(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl<const N: usize> From<[&str; N]> for AttributeValue {
    fn from(items: [&str; N]) -> Self {
        AttributeValue::Set(items.iter().map(|s| s.to_string()).collect())
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Str(s) => f.write_str(s),
            AttributeValue::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    f.write_str(item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// One category's attribute mapping.
///
/// Keys are unprefixed within a set; the category namespace is applied where
/// sets are combined into a request. BTreeMap keeps iteration deterministic
/// so request fingerprints are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet {
    values: BTreeMap<String, AttributeValue>,
}

impl AttributeSet {
    pub fn new() -> Self {
        AttributeSet::default()
    }

    /// Consuming setter for fluent construction.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(AttributeValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(AttributeValue::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(AttributeValue::as_int)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let set = AttributeSet::new()
            .with(keys::ROLE, "DOCTOR")
            .with(keys::IS_EMERGENCY, true)
            .with(keys::CURRENT_HOUR, 14i64);

        assert_eq!(set.get_str(keys::ROLE), Some("DOCTOR"));
        assert_eq!(set.get_bool(keys::IS_EMERGENCY), Some(true));
        assert_eq!(set.get_int(keys::CURRENT_HOUR), Some(14));

        // Wrong-type accessors return None rather than coercing
        assert_eq!(set.get_bool(keys::ROLE), None);
        assert_eq!(set.get_str(keys::IS_EMERGENCY), None);
    }

    #[test]
    fn test_set_value() {
        let value = AttributeValue::from(["D-1", "D-2"]);
        let items = value.as_set().unwrap();
        assert!(items.contains("D-1"));
        assert!(items.contains("D-2"));
        assert!(!items.contains("D-3"));
    }

    #[test]
    fn test_namespaced_key_split() {
        assert_eq!(
            AttributeCategory::split("subject.role"),
            Some((AttributeCategory::Subject, "role"))
        );
        assert_eq!(
            AttributeCategory::split("resource.isEmergency"),
            Some((AttributeCategory::Resource, "isEmergency"))
        );
        assert_eq!(AttributeCategory::split("unprefixed"), None);
        assert_eq!(AttributeCategory::split("clock.hour"), None);
    }

    #[test]
    fn test_untagged_value_deserialization() {
        let value: AttributeValue = serde_yaml::from_str("DOCTOR").unwrap();
        assert_eq!(value, AttributeValue::Str("DOCTOR".to_string()));

        let value: AttributeValue = serde_yaml::from_str("true").unwrap();
        assert_eq!(value, AttributeValue::Bool(true));

        let value: AttributeValue = serde_yaml::from_str("42").unwrap();
        assert_eq!(value, AttributeValue::Int(42));

        let value: AttributeValue = serde_yaml::from_str("[\"D-1\", \"D-2\"]").unwrap();
        assert!(value.as_set().unwrap().contains("D-1"));
    }
}

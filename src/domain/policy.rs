use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::attributes::AttributeValue;
use super::decision::Effect;

/// Boolean condition tree over namespaced attribute keys.
///
/// Conditions are declarative and serializable; the YAML spelling is the
/// externally tagged variant name (`all`, `eq`, `same_as`, ...). A comparison
/// against a missing key evaluates to false, never to an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Every sub-condition holds (short-circuiting).
    All(Vec<Condition>),
    /// At least one sub-condition holds (short-circuiting).
    Any(Vec<Condition>),
    Not(Box<Condition>),
    /// Attribute equals a literal value.
    Eq { key: String, value: AttributeValue },
    /// Set-valued attribute contains a literal string.
    Contains { key: String, value: String },
    /// Set-valued attribute at `key` contains the string value of `other`.
    ContainsAttr { key: String, other: String },
    /// Two attributes hold the same value (cross-category equality).
    SameAs { key: String, other: String },
    /// Attribute is present, whatever its value.
    Present { key: String },
    /// Integer attribute is >= the literal.
    Gte { key: String, value: i64 },
    /// Integer attribute is <= the literal.
    Lte { key: String, value: i64 },
    /// Boolean attribute is true.
    IsTrue { key: String },
}

impl Condition {
    /// Collect every attribute key this condition may consult.
    pub fn collect_keys(&self, out: &mut BTreeSet<String>) {
        match self {
            Condition::All(items) | Condition::Any(items) => {
                for item in items {
                    item.collect_keys(out);
                }
            }
            Condition::Not(inner) => inner.collect_keys(out),
            Condition::Eq { key, .. }
            | Condition::Contains { key, .. }
            | Condition::Present { key }
            | Condition::Gte { key, .. }
            | Condition::Lte { key, .. }
            | Condition::IsTrue { key } => {
                out.insert(key.clone());
            }
            Condition::ContainsAttr { key, other } | Condition::SameAs { key, other } => {
                out.insert(key.clone());
                out.insert(other.clone());
            }
        }
    }
}

/// A single policy rule.
///
/// Applicability (`resource_type` + `actions`) selects candidates; the
/// condition decides whether the rule matches; priority orders candidates
/// with higher values evaluated first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule identifier
    pub id: String,

    /// Resource type this rule applies to
    #[serde(rename = "resource")]
    pub resource_type: String,

    /// Action types this rule applies to; empty means any action
    #[serde(default)]
    pub actions: Vec<String>,

    pub effect: Effect,

    #[serde(default)]
    pub priority: i32,

    // Spelled as a singleton map (`eq: {...}`) in YAML, not a `!eq` tag
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub condition: Condition,
}

impl Rule {
    /// Applicability check. Action matching is case-insensitive because
    /// action types are free text supplied by callers.
    pub fn applies_to(&self, resource_type: &str, action: &str) -> bool {
        if self.resource_type != resource_type {
            return false;
        }
        self.actions.is_empty()
            || self
                .actions
                .iter()
                .any(|a| a.eq_ignore_ascii_case(action))
    }
}

/// A versioned, ordered set of rules.
///
/// Policies are immutable after publication; an update is a new version
/// published through the repository, never an in-place mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy version identifier
    #[serde(rename = "policy_version")]
    pub version: String,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Policy {
    /// Create an empty policy. Every evaluation under it is a default deny.
    pub fn empty() -> Self {
        Policy {
            version: "0.0.0".to_string(),
            rules: Vec::new(),
        }
    }

    /// Candidate rules for a resource/action pair, descending priority.
    /// The sort is stable so declaration order breaks priority ties.
    pub fn candidates(&self, resource_type: &str, action: &str) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|r| r.applies_to(resource_type, action))
            .collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_deserialization() {
        let yaml = r#"
policy_version: "2026-01-01.1"
rules:
  - id: ADMIN_ALL
    resource: patient
    effect: PERMIT
    priority: 50
    condition:
      eq: { key: subject.role, value: ADMIN }
  - id: PATIENT_SELF
    resource: patient
    actions: [read, export]
    effect: PERMIT
    priority: 10
    condition:
      same_as: { key: subject.patientId, other: resource.patientId }
  - id: LEGAL_HOLD
    resource: patient
    effect: DENY
    priority: 100
    condition:
      is_true: { key: resource.legalHold }
"#;

        let policy: Policy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.version, "2026-01-01.1");
        assert_eq!(policy.rules.len(), 3);
        assert_eq!(policy.rules[0].effect, Effect::Permit);
        assert_eq!(policy.rules[2].effect, Effect::Deny);
        assert_eq!(policy.rules[2].priority, 100);
        assert!(policy.rules[0].actions.is_empty());
    }

    #[test]
    fn test_nested_condition_yaml_round_trip() {
        let yaml = r#"
policy_version: "v1"
rules:
  - id: DOCTOR_ASSIGNED_OR_DEPARTMENT
    resource: patient
    effect: PERMIT
    priority: 30
    condition:
      all:
        - eq: { key: subject.role, value: DOCTOR }
        - any:
            - contains_attr: { key: resource.assignedDoctors, other: subject.doctorId }
            - same_as: { key: subject.departmentId, other: resource.departmentId }
        - not:
            is_true: { key: resource.legalHold }
"#;

        let policy: Policy = serde_yaml::from_str(yaml).unwrap();
        let Condition::All(items) = &policy.rules[0].condition else {
            panic!("expected all, got {:?}", policy.rules[0].condition);
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Condition::Eq { .. }));
        assert!(matches!(items[1], Condition::Any(_)));
        assert!(matches!(items[2], Condition::Not(_)));

        // Serialization uses the same map spelling, so a dumped policy reloads
        let dumped = serde_yaml::to_string(&policy).unwrap();
        let reloaded: Policy = serde_yaml::from_str(&dumped).unwrap();
        assert_eq!(reloaded, policy);
    }

    #[test]
    fn test_applies_to_case_insensitive_action() {
        let rule = Rule {
            id: "R1".to_string(),
            resource_type: "patient".to_string(),
            actions: vec!["read".to_string()],
            effect: Effect::Permit,
            priority: 0,
            condition: Condition::Present {
                key: "subject.role".to_string(),
            },
        };

        assert!(rule.applies_to("patient", "READ"));
        assert!(rule.applies_to("patient", "read"));
        assert!(!rule.applies_to("patient", "write"));
        assert!(!rule.applies_to("appointment", "read"));
    }

    #[test]
    fn test_candidates_priority_order() {
        let mk = |id: &str, priority: i32| Rule {
            id: id.to_string(),
            resource_type: "patient".to_string(),
            actions: vec![],
            effect: Effect::Permit,
            priority,
            condition: Condition::Present {
                key: "subject.role".to_string(),
            },
        };

        let policy = Policy {
            version: "v1".to_string(),
            rules: vec![mk("LOW", 1), mk("HIGH", 100), mk("MID_A", 10), mk("MID_B", 10)],
        };

        let ids: Vec<&str> = policy
            .candidates("patient", "read")
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        // Stable sort keeps MID_A before MID_B
        assert_eq!(ids, vec!["HIGH", "MID_A", "MID_B", "LOW"]);
    }

    #[test]
    fn test_collect_keys() {
        let condition = Condition::All(vec![
            Condition::Eq {
                key: "subject.role".to_string(),
                value: AttributeValue::from("DOCTOR"),
            },
            Condition::Any(vec![
                Condition::SameAs {
                    key: "subject.departmentId".to_string(),
                    other: "resource.departmentId".to_string(),
                },
                Condition::ContainsAttr {
                    key: "resource.assignedDoctors".to_string(),
                    other: "subject.doctorId".to_string(),
                },
            ]),
        ]);

        let mut keys = BTreeSet::new();
        condition.collect_keys(&mut keys);
        assert!(keys.contains("subject.role"));
        assert!(keys.contains("subject.departmentId"));
        assert!(keys.contains("resource.departmentId"));
        assert!(keys.contains("resource.assignedDoctors"));
        assert!(keys.contains("subject.doctorId"));
        assert_eq!(keys.len(), 5);
    }
}

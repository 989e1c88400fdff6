use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Effect of an access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Permit,
    Deny,
}

impl Effect {
    #[inline]
    pub fn is_permit(&self) -> bool {
        *self == Effect::Permit
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Permit => write!(f, "PERMIT"),
            Effect::Deny => write!(f, "DENY"),
        }
    }
}

/// Result of evaluating an access request against the active policy.
///
/// Immutable after creation; cached copies are returned unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub effect: Effect,

    /// The rule that decided, `None` when no rule applied (default deny).
    pub rule_id: Option<String>,

    /// Attribute keys actually consulted during evaluation, for audit.
    pub consulted_keys: SmallVec<[String; 8]>,

    /// Attribute resolution warnings (collaborator unreachable etc.).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Policy version the decision was computed under.
    pub policy_version: String,

    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    /// Default deny: no rule applied.
    pub fn deny_default(policy_version: impl Into<String>) -> Self {
        Decision {
            effect: Effect::Deny,
            rule_id: None,
            consulted_keys: SmallVec::new(),
            warnings: Vec::new(),
            policy_version: policy_version.into(),
            evaluated_at: Utc::now(),
        }
    }

    #[inline]
    pub fn is_permit(&self) -> bool {
        self.effect.is_permit()
    }

    /// Audit-friendly rule id, `"NONE"` when no rule applied.
    pub fn rule_id_str(&self) -> &str {
        self.rule_id.as_deref().unwrap_or("NONE")
    }
}

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::domain::attributes::AttributeValue;
use crate::domain::policy::Condition;
use crate::domain::request::AccessRequest;

/// A condition that cannot be evaluated against the attributes it was given.
///
/// The engine treats this as a policy-authoring defect and fails the
/// evaluation closed.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("attribute `{key}` has the wrong type for `{op}`")]
    TypeMismatch { key: String, op: &'static str },
}

/// Evaluates condition trees against a frozen request plus the attributes
/// resolved on demand, tracking which keys were consulted.
pub struct Evaluator<'a> {
    request: &'a AccessRequest,
    resolved: &'a BTreeMap<String, AttributeValue>,
    consulted: BTreeSet<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        request: &'a AccessRequest,
        resolved: &'a BTreeMap<String, AttributeValue>,
    ) -> Self {
        Evaluator {
            request,
            resolved,
            consulted: BTreeSet::new(),
        }
    }

    /// Keys consulted so far, in canonical order.
    pub fn consulted_keys(&self) -> impl Iterator<Item = &String> {
        self.consulted.iter()
    }

    fn lookup(&mut self, key: &str) -> Option<AttributeValue> {
        self.consulted.insert(key.to_string());
        self.request
            .lookup(key)
            .or_else(|| self.resolved.get(key))
            .cloned()
    }

    /// Evaluate a condition. Comparisons against a missing key are false;
    /// present-but-mistyped operands are an error, never a silent false
    /// positive.
    pub fn eval(&mut self, condition: &Condition) -> Result<bool, EvaluationError> {
        match condition {
            Condition::All(items) => {
                for item in items {
                    if !self.eval(item)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any(items) => {
                for item in items {
                    if self.eval(item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!self.eval(inner)?),
            Condition::Eq { key, value } => {
                Ok(self.lookup(key).map_or(false, |v| v == *value))
            }
            Condition::Contains { key, value } => match self.lookup(key) {
                None => Ok(false),
                Some(AttributeValue::Set(items)) => Ok(items.contains(value)),
                Some(_) => Err(EvaluationError::TypeMismatch {
                    key: key.clone(),
                    op: "contains",
                }),
            },
            Condition::ContainsAttr { key, other } => {
                let needle = match self.lookup(other) {
                    None => return Ok(false),
                    Some(AttributeValue::Str(s)) => s,
                    Some(_) => {
                        return Err(EvaluationError::TypeMismatch {
                            key: other.clone(),
                            op: "contains_attr",
                        })
                    }
                };
                match self.lookup(key) {
                    None => Ok(false),
                    Some(AttributeValue::Set(items)) => Ok(items.contains(&needle)),
                    Some(_) => Err(EvaluationError::TypeMismatch {
                        key: key.clone(),
                        op: "contains_attr",
                    }),
                }
            }
            Condition::SameAs { key, other } => {
                match (self.lookup(key), self.lookup(other)) {
                    (Some(a), Some(b)) => Ok(a == b),
                    _ => Ok(false),
                }
            }
            Condition::Present { key } => Ok(self.lookup(key).is_some()),
            Condition::Gte { key, value } => match self.lookup(key) {
                None => Ok(false),
                Some(AttributeValue::Int(i)) => Ok(i >= *value),
                Some(_) => Err(EvaluationError::TypeMismatch {
                    key: key.clone(),
                    op: "gte",
                }),
            },
            Condition::Lte { key, value } => match self.lookup(key) {
                None => Ok(false),
                Some(AttributeValue::Int(i)) => Ok(i <= *value),
                Some(_) => Err(EvaluationError::TypeMismatch {
                    key: key.clone(),
                    op: "lte",
                }),
            },
            Condition::IsTrue { key } => match self.lookup(key) {
                None => Ok(false),
                Some(AttributeValue::Bool(b)) => Ok(b),
                Some(_) => Err(EvaluationError::TypeMismatch {
                    key: key.clone(),
                    op: "is_true",
                }),
            },
        }
    }
}

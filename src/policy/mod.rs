pub mod loader;

pub use loader::{load_policy, validate_policy, PolicyError};

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::info;

use crate::domain::attributes::AttributeValue;
use crate::domain::decision::Effect;
use crate::domain::policy::{Condition, Policy, Rule};

/// Versioned policy holder with copy-on-publish semantics.
///
/// Readers take an `Arc` snapshot of the active policy and never observe a
/// mix of two versions. Publish and rollback swap the active pointer; history
/// is retained for audit replay, never deleted.
pub struct PolicyRepository {
    active: RwLock<Arc<Policy>>,
    history: Mutex<Vec<Arc<Policy>>>,
}

impl PolicyRepository {
    pub fn new(initial: Policy) -> Result<Self, PolicyError> {
        validate_policy(&initial)?;
        let initial = Arc::new(initial);
        Ok(PolicyRepository {
            active: RwLock::new(initial.clone()),
            history: Mutex::new(vec![initial]),
        })
    }

    /// Repository holding an empty policy; everything denies by default.
    pub fn empty() -> Self {
        let initial = Arc::new(Policy::empty());
        PolicyRepository {
            active: RwLock::new(initial.clone()),
            history: Mutex::new(vec![initial]),
        }
    }

    /// Consistent snapshot of the active policy.
    pub fn active(&self) -> Arc<Policy> {
        self.active.read().clone()
    }

    /// Publish a new version. Atomic from the evaluator's point of view.
    pub fn publish(&self, policy: Policy) -> Result<(), PolicyError> {
        validate_policy(&policy)?;
        let policy = Arc::new(policy);

        let mut history = self.history.lock();
        if history.iter().any(|p| p.version == policy.version) {
            return Err(PolicyError::Validation(format!(
                "Version already published: {}",
                policy.version
            )));
        }
        history.push(policy.clone());

        let previous = {
            let mut active = self.active.write();
            std::mem::replace(&mut *active, policy.clone())
        };
        info!(from = %previous.version, to = %policy.version, "policy published");
        Ok(())
    }

    /// Re-activate a previously published version. A pointer swap, not a
    /// delete: the full history stays intact.
    pub fn rollback(&self, version: &str) -> Result<(), PolicyError> {
        let target = {
            let history = self.history.lock();
            history
                .iter()
                .find(|p| p.version == version)
                .cloned()
                .ok_or_else(|| PolicyError::UnknownVersion(version.to_string()))?
        };

        *self.active.write() = target;
        info!(version = %version, "policy rolled back");
        Ok(())
    }

    /// Versions ever published, oldest first.
    pub fn versions(&self) -> Vec<String> {
        self.history.lock().iter().map(|p| p.version.clone()).collect()
    }
}

/// Declarative rendition of the hospital backend's built-in policy families.
///
/// Used as a fixture and a starting point for deployments; production
/// policies are loaded from YAML and published through the repository.
pub fn baseline_policy() -> Policy {
    let role_is = |role: &str| Condition::Eq {
        key: "subject.role".to_string(),
        value: AttributeValue::from(role),
    };

    let rules = vec![
        // Admins manage everything, including audit and system resources.
        Rule {
            id: "ADMIN_PATIENT_ALL".to_string(),
            resource_type: "patient".to_string(),
            actions: vec![],
            effect: Effect::Permit,
            priority: 90,
            condition: role_is("ADMIN"),
        },
        Rule {
            id: "ADMIN_SYSTEM".to_string(),
            resource_type: "system".to_string(),
            actions: vec![],
            effect: Effect::Permit,
            priority: 90,
            condition: role_is("ADMIN"),
        },
        Rule {
            id: "ADMIN_AUDIT".to_string(),
            resource_type: "audit".to_string(),
            actions: vec![],
            effect: Effect::Permit,
            priority: 90,
            condition: role_is("ADMIN"),
        },
        // Emergency access for medical staff, above the ordinary rules.
        Rule {
            id: "EMERGENCY_STAFF".to_string(),
            resource_type: "patient".to_string(),
            actions: vec![],
            effect: Effect::Permit,
            priority: 80,
            condition: Condition::All(vec![
                Condition::IsTrue {
                    key: "resource.isEmergency".to_string(),
                },
                Condition::Any(vec![role_is("DOCTOR"), role_is("NURSE")]),
            ]),
        },
        // Patients read and export their own data.
        Rule {
            id: "PATIENT_SELF".to_string(),
            resource_type: "patient".to_string(),
            actions: vec!["read".to_string(), "export".to_string()],
            effect: Effect::Permit,
            priority: 40,
            condition: Condition::SameAs {
                key: "subject.patientId".to_string(),
                other: "resource.patientId".to_string(),
            },
        },
        // Doctors reach patients assigned to them or in their department.
        Rule {
            id: "DOCTOR_ASSIGNED_OR_DEPARTMENT".to_string(),
            resource_type: "patient".to_string(),
            actions: vec![],
            effect: Effect::Permit,
            priority: 30,
            condition: Condition::All(vec![
                role_is("DOCTOR"),
                Condition::Any(vec![
                    Condition::ContainsAttr {
                        key: "resource.assignedDoctors".to_string(),
                        other: "subject.doctorId".to_string(),
                    },
                    Condition::SameAs {
                        key: "subject.departmentId".to_string(),
                        other: "resource.departmentId".to_string(),
                    },
                ]),
            ]),
        },
        // Nurses reach patients in their department.
        Rule {
            id: "NURSE_DEPARTMENT".to_string(),
            resource_type: "patient".to_string(),
            actions: vec!["read".to_string()],
            effect: Effect::Permit,
            priority: 30,
            condition: Condition::All(vec![
                role_is("NURSE"),
                Condition::SameAs {
                    key: "subject.departmentId".to_string(),
                    other: "resource.departmentId".to_string(),
                },
            ]),
        },
        // Medical records: doctors read anything, write only their own.
        Rule {
            id: "MEDICAL_RECORD_DOCTOR_READ".to_string(),
            resource_type: "medical_record".to_string(),
            actions: vec!["read".to_string()],
            effect: Effect::Permit,
            priority: 30,
            condition: role_is("DOCTOR"),
        },
        Rule {
            id: "MEDICAL_RECORD_DOCTOR_WRITE_OWN".to_string(),
            resource_type: "medical_record".to_string(),
            actions: vec!["write".to_string(), "update".to_string()],
            effect: Effect::Permit,
            priority: 30,
            condition: Condition::All(vec![
                role_is("DOCTOR"),
                Condition::SameAs {
                    key: "subject.doctorId".to_string(),
                    other: "resource.doctorId".to_string(),
                },
            ]),
        },
        // Scheduling outside business hours is reserved for admins/doctors.
        Rule {
            id: "AFTER_HOURS_SCHEDULING".to_string(),
            resource_type: "appointment".to_string(),
            actions: vec!["schedule".to_string()],
            effect: Effect::Deny,
            priority: 60,
            condition: Condition::All(vec![
                Condition::Not(Box::new(Condition::IsTrue {
                    key: "environment.isBusinessHours".to_string(),
                })),
                Condition::Not(Box::new(Condition::Any(vec![
                    role_is("ADMIN"),
                    role_is("DOCTOR"),
                ]))),
            ]),
        },
    ];

    Policy {
        version: "baseline-1".to_string(),
        rules,
    }
}

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditEvent, AuditSink};
use crate::domain::attributes::{keys, AttributeSet};
use crate::domain::case::{
    CaseId, CaseStatus, ExportPayload, RightsCase, RightsOperation, SubtaskState,
};
use crate::domain::request::AccessRequest;
use crate::engine::DecisionEngine;
use crate::observability::EngineMetrics;

use super::collaborator::{Collaborator, HandlerError};
use super::retry::RetryPolicy;
use super::store::CaseStore;

/// Errors for case lifecycle operations. An authorization denial is not an
/// error; it is the DENIED terminal status.
#[derive(Error, Debug)]
pub enum CaseError {
    #[error("unknown case: {0}")]
    UnknownCase(CaseId),

    #[error("case {0} is {1}; only PARTIALLY_FAILED cases can be retried")]
    NotRetryable(CaseId, CaseStatus),

    #[error("case {0} was cancelled")]
    Cancelled(CaseId),
}

/// Drives export and erasure workflows across collaborator services.
///
/// The decision engine gates every case; collaborators are only contacted
/// after a permit. Subtasks fan out concurrently, carry independent retry
/// budgets, and record completion in the case store so retries are
/// incremental. No transaction spans services: consistency rests on handler
/// idempotency plus durable case state.
pub struct RightsOrchestrator {
    engine: Arc<DecisionEngine>,
    collaborators: Vec<Arc<dyn Collaborator>>,
    store: Arc<dyn CaseStore>,
    audit: Arc<dyn AuditSink>,
    retry: RetryPolicy,
    metrics: Arc<EngineMetrics>,
}

impl RightsOrchestrator {
    pub fn new(
        engine: Arc<DecisionEngine>,
        collaborators: Vec<Arc<dyn Collaborator>>,
        store: Arc<dyn CaseStore>,
        audit: Arc<dyn AuditSink>,
        retry: RetryPolicy,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        RightsOrchestrator {
            engine,
            collaborators,
            store,
            audit,
            retry,
            metrics,
        }
    }

    /// Open a rights case and drive it to a terminal state.
    ///
    /// `requester` is the authenticated subject attribute set from the
    /// calling layer; it becomes the subject of the authorization request.
    pub async fn start_case(
        &self,
        subject_id: &str,
        operation: RightsOperation,
        requester: AttributeSet,
    ) -> CaseId {
        let services: Vec<String> = self
            .collaborators
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let case = RightsCase::new(subject_id, operation, services);
        let case_id = case.id;
        let actor = requester
            .get_str(keys::USER_ID)
            .unwrap_or("anonymous")
            .to_string();

        self.store.insert(case);
        self.metrics.record_case_opened();
        self.audit.record(AuditEntry::new(
            &actor,
            AuditEvent::CaseOpened {
                case_id,
                subject_id: subject_id.to_string(),
                operation,
            },
        ));
        info!(case_id = %case_id, subject_id, operation = %operation, "rights case opened");

        self.store
            .update(case_id, &mut |c| c.status = CaseStatus::Authorizing);

        let request = AccessRequest::builder()
            .subject_set(requester)
            .for_patient(subject_id)
            .action(operation.action_type())
            .build();
        let decision = self.engine.evaluate(&request).await;

        if !decision.is_permit() {
            let rule_id = decision.rule_id_str().to_string();
            self.store.update(case_id, &mut |c| {
                c.status = CaseStatus::Denied;
                c.denied_by = Some(rule_id.clone());
                c.completed_at = Some(Utc::now());
            });
            self.close_case(&actor, case_id, CaseStatus::Denied);
            return case_id;
        }

        self.store
            .update(case_id, &mut |c| c.status = CaseStatus::InProgress);
        self.run_subtasks(&actor, case_id).await;
        case_id
    }

    /// Re-drive a partially failed case, re-invoking only subtasks that have
    /// not succeeded.
    pub async fn retry_case(&self, case_id: CaseId) -> Result<CaseStatus, CaseError> {
        let case = self
            .store
            .get(case_id)
            .ok_or(CaseError::UnknownCase(case_id))?;
        if case.cancelled {
            return Err(CaseError::Cancelled(case_id));
        }
        if case.status != CaseStatus::PartiallyFailed {
            return Err(CaseError::NotRetryable(case_id, case.status));
        }

        self.store.update(case_id, &mut |c| {
            c.status = CaseStatus::InProgress;
            c.completed_at = None;
            for sub in &mut c.subtasks {
                if sub.state == SubtaskState::Failed {
                    sub.state = SubtaskState::Pending;
                    sub.error = None;
                }
            }
        });

        // Retries are operator-driven; the original requester is gone
        self.run_subtasks("system", case_id).await;

        self.store
            .get(case_id)
            .map(|c| c.status)
            .ok_or(CaseError::UnknownCase(case_id))
    }

    /// Stop scheduling new subtask attempts for a case; in-flight attempts
    /// finish so collaborators are never left mid-operation.
    pub fn cancel_case(&self, case_id: CaseId) -> Result<(), CaseError> {
        if self.store.update(case_id, &mut |c| c.cancelled = true) {
            info!(case_id = %case_id, "rights case cancelled");
            Ok(())
        } else {
            Err(CaseError::UnknownCase(case_id))
        }
    }

    /// Status inspection for the consuming layer.
    pub fn case(&self, case_id: CaseId) -> Option<RightsCase> {
        self.store.get(case_id)
    }

    /// Fan out one subtask per collaborator whose outcome is not yet OK,
    /// wait for all of them, then settle the terminal status.
    async fn run_subtasks(&self, actor: &str, case_id: CaseId) {
        let Some(case) = self.store.get(case_id) else {
            return;
        };
        let operation = case.operation;

        let mut join = JoinSet::new();
        for collaborator in &self.collaborators {
            if case.cancelled {
                break;
            }
            let done = case
                .subtask(collaborator.name())
                .map(|s| s.state == SubtaskState::Ok)
                .unwrap_or(false);
            if done {
                continue;
            }

            join.spawn(
                SubtaskRun {
                    collaborator: collaborator.clone(),
                    case_id,
                    subject_id: case.subject_id.clone(),
                    operation,
                    retry: self.retry.clone(),
                    store: self.store.clone(),
                    audit: self.audit.clone(),
                    metrics: self.metrics.clone(),
                    actor: actor.to_string(),
                }
                .run(),
            );
        }

        let mut sections: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((service, Some(bytes))) => {
                    sections.insert(service, bytes);
                }
                Ok((_, None)) => {}
                Err(e) => warn!(case_id = %case_id, error = %e, "subtask task failed to join"),
            }
        }

        self.store.update(case_id, &mut |c| {
            if operation == RightsOperation::Export {
                let mut payload = c.export.take().unwrap_or_else(|| ExportPayload {
                    subject_id: c.subject_id.clone(),
                    ..ExportPayload::default()
                });
                payload.sections.append(&mut sections);
                payload.missing = c
                    .subtasks
                    .iter()
                    .filter(|s| s.state != SubtaskState::Ok)
                    .map(|s| s.service.clone())
                    .collect();
                c.export = Some(payload);
            }
            c.status = c.implied_outcome();
            c.completed_at = Some(Utc::now());
        });

        if let Some(status) = self.store.get(case_id).map(|c| c.status) {
            self.close_case(actor, case_id, status);
        }
    }

    fn close_case(&self, actor: &str, case_id: CaseId, status: CaseStatus) {
        self.metrics.record_case_closed(status);
        self.audit.record(AuditEntry::new(
            actor,
            AuditEvent::CaseClosed { case_id, status },
        ));
        info!(case_id = %case_id, status = %status, "rights case closed");
    }
}

/// One collaborator subtask: retry loop, state persistence, audit.
struct SubtaskRun {
    collaborator: Arc<dyn Collaborator>,
    case_id: CaseId,
    subject_id: String,
    operation: RightsOperation,
    retry: RetryPolicy,
    store: Arc<dyn CaseStore>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<EngineMetrics>,
    actor: String,
}

impl SubtaskRun {
    /// Returns the service name and, for a successful export, its payload.
    async fn run(self) -> (String, Option<Vec<u8>>) {
        let service = self.collaborator.name().to_string();
        let mut export_bytes = None;
        let mut attempts = 0u32;

        let outcome: Option<(SubtaskState, Option<String>)> = loop {
            // Cancellation stops further attempts; the subtask keeps its
            // current recorded state.
            let cancelled = self
                .store
                .get(self.case_id)
                .map(|c| c.cancelled)
                .unwrap_or(true);
            if cancelled {
                break None;
            }

            if attempts > 0 {
                self.metrics.record_subtask_retry();
                sleep(self.retry.backoff(attempts)).await;
            }
            attempts += 1;

            let result = match self.operation {
                RightsOperation::Export => self
                    .collaborator
                    .export_subject(&self.subject_id)
                    .await
                    .map(|bytes| export_bytes = Some(bytes)),
                RightsOperation::Erase => self.collaborator.erase_subject(&self.subject_id).await,
            };

            match result {
                Ok(()) => break Some((SubtaskState::Ok, None)),
                Err(e @ HandlerError::Permanent(_)) => {
                    break Some((SubtaskState::Failed, Some(e.to_string())))
                }
                Err(e @ HandlerError::Transient(_)) => {
                    if attempts >= self.retry.max_attempts {
                        break Some((SubtaskState::Failed, Some(e.to_string())));
                    }
                    warn!(
                        service = %service,
                        attempt = attempts,
                        error = %e,
                        "transient subtask failure, will retry"
                    );
                }
            }
        };

        // Persist whatever was consumed of the attempt budget, then the
        // outcome if one was reached.
        let mut total_attempts = attempts;
        self.store.update(self.case_id, &mut |c| {
            if let Some(sub) = c.subtask_mut(&service) {
                sub.attempts += attempts;
                total_attempts = sub.attempts;
                if let Some((state, ref error)) = outcome {
                    sub.state = state;
                    sub.error = error.clone();
                }
            }
        });

        let Some((state, error)) = outcome else {
            return (service, None);
        };
        if state == SubtaskState::Failed {
            self.metrics.record_subtask_failure();
        }
        self.audit.record(AuditEntry::new(
            &self.actor,
            AuditEvent::SubtaskOutcome {
                case_id: self.case_id,
                service: service.clone(),
                state,
                attempts: total_attempts,
                error,
            },
        ));

        let payload = if state == SubtaskState::Ok {
            export_bytes
        } else {
            None
        };
        (service, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeResolver;
    use crate::audit::MemoryAuditSink;
    use crate::domain::attributes::AttributeValue;
    use crate::domain::decision::Effect;
    use crate::domain::policy::{Condition, Policy, Rule};
    use crate::engine::CacheConfig;
    use crate::policy::PolicyRepository;
    use crate::rights::store::MemoryCaseStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Succeed,
        FailTransient,
        FailPermanent,
    }

    struct FakeService {
        name: &'static str,
        behavior: Mutex<Behavior>,
        export_calls: AtomicU32,
        erase_calls: AtomicU32,
        erased: Mutex<BTreeSet<String>>,
    }

    impl FakeService {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(FakeService {
                name,
                behavior: Mutex::new(behavior),
                export_calls: AtomicU32::new(0),
                erase_calls: AtomicU32::new(0),
                erased: Mutex::new(BTreeSet::new()),
            })
        }

        fn set_behavior(&self, behavior: Behavior) {
            *self.behavior.lock() = behavior;
        }

        fn exports(&self) -> u32 {
            self.export_calls.load(Ordering::SeqCst)
        }

        fn erases(&self) -> u32 {
            self.erase_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Collaborator for FakeService {
        fn name(&self) -> &str {
            self.name
        }

        async fn export_subject(&self, subject_id: &str) -> Result<Vec<u8>, HandlerError> {
            self.export_calls.fetch_add(1, Ordering::SeqCst);
            match *self.behavior.lock() {
                Behavior::Succeed => Ok(format!("{{\"subject\":\"{}\"}}", subject_id).into_bytes()),
                Behavior::FailTransient => {
                    Err(HandlerError::Transient("service timeout".to_string()))
                }
                Behavior::FailPermanent => {
                    Err(HandlerError::Permanent("subject unknown".to_string()))
                }
            }
        }

        async fn erase_subject(&self, subject_id: &str) -> Result<(), HandlerError> {
            self.erase_calls.fetch_add(1, Ordering::SeqCst);
            match *self.behavior.lock() {
                Behavior::Succeed => {
                    // Idempotent: erasing an already-erased subject is a no-op
                    self.erased.lock().insert(subject_id.to_string());
                    Ok(())
                }
                Behavior::FailTransient => {
                    Err(HandlerError::Transient("service timeout".to_string()))
                }
                Behavior::FailPermanent => {
                    Err(HandlerError::Permanent("subject unknown".to_string()))
                }
            }
        }
    }

    fn rights_policy() -> Policy {
        Policy {
            version: "rights-1".to_string(),
            rules: vec![Rule {
                id: "STAFF_RIGHTS".to_string(),
                resource_type: "patient".to_string(),
                actions: vec!["export".to_string(), "erase".to_string()],
                effect: Effect::Permit,
                priority: 10,
                condition: Condition::Eq {
                    key: "subject.role".to_string(),
                    value: AttributeValue::from("staff"),
                },
            }],
        }
    }

    struct Harness {
        orchestrator: RightsOrchestrator,
        audit: Arc<MemoryAuditSink>,
        metrics: Arc<EngineMetrics>,
    }

    fn harness(collaborators: Vec<Arc<FakeService>>) -> Harness {
        let collaborators: Vec<Arc<dyn Collaborator>> = collaborators
            .into_iter()
            .map(|c| c as Arc<dyn Collaborator>)
            .collect();
        let audit = Arc::new(MemoryAuditSink::new());
        let metrics = Arc::new(EngineMetrics::new());
        let engine = Arc::new(DecisionEngine::new(
            Arc::new(PolicyRepository::new(rights_policy()).unwrap()),
            Arc::new(AttributeResolver::new()),
            audit.clone(),
            metrics.clone(),
            CacheConfig::disabled(),
        ));
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        };
        let orchestrator = RightsOrchestrator::new(
            engine,
            collaborators,
            Arc::new(MemoryCaseStore::new()),
            audit.clone(),
            retry,
            metrics.clone(),
        );
        Harness {
            orchestrator,
            audit,
            metrics,
        }
    }

    fn staff() -> AttributeSet {
        AttributeSet::new()
            .with(keys::USER_ID, "U-9")
            .with(keys::ROLE, "staff")
    }

    fn guest() -> AttributeSet {
        AttributeSet::new()
            .with(keys::USER_ID, "U-0")
            .with(keys::ROLE, "guest")
    }

    #[tokio::test]
    async fn test_export_completes_for_staff() {
        let a = FakeService::new("patients", Behavior::Succeed);
        let b = FakeService::new("appointments", Behavior::Succeed);
        let h = harness(vec![a.clone(), b.clone()]);

        let case_id = h
            .orchestrator
            .start_case("P-1", RightsOperation::Export, staff())
            .await;

        let case = h.orchestrator.case(case_id).unwrap();
        assert_eq!(case.status, CaseStatus::Completed);
        assert!(case.subtasks.iter().all(|s| s.state == SubtaskState::Ok));
        assert!(case.completed_at.is_some());

        let payload = case.export.unwrap();
        assert!(payload.is_complete());
        assert_eq!(payload.sections.len(), 2);
        assert!(payload.sections.contains_key("patients"));
        assert!(payload.sections.contains_key("appointments"));

        assert_eq!(a.exports(), 1);
        assert_eq!(b.exports(), 1);
        assert_eq!(h.metrics.snapshot().cases_completed, 1);

        // CaseOpened, Decision, two SubtaskOutcomes, CaseClosed
        assert_eq!(h.audit.len(), 5);
    }

    #[tokio::test]
    async fn test_guest_is_denied_without_collaborator_contact() {
        let a = FakeService::new("patients", Behavior::Succeed);
        let b = FakeService::new("appointments", Behavior::Succeed);
        let h = harness(vec![a.clone(), b.clone()]);

        let case_id = h
            .orchestrator
            .start_case("P-1", RightsOperation::Export, guest())
            .await;

        let case = h.orchestrator.case(case_id).unwrap();
        assert_eq!(case.status, CaseStatus::Denied);
        assert_eq!(case.denied_by.as_deref(), Some("NONE"));
        assert!(case
            .subtasks
            .iter()
            .all(|s| s.state == SubtaskState::Pending && s.attempts == 0));

        assert_eq!(a.exports(), 0);
        assert_eq!(b.exports(), 0);
        assert_eq!(a.erases(), 0);
        assert_eq!(b.erases(), 0);
        assert_eq!(h.metrics.snapshot().cases_denied, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_erase_partial_failure_exhausts_retry_budget() {
        let a = FakeService::new("patients", Behavior::Succeed);
        let b = FakeService::new("appointments", Behavior::FailTransient);
        let h = harness(vec![a.clone(), b.clone()]);

        let case_id = h
            .orchestrator
            .start_case("P-1", RightsOperation::Erase, staff())
            .await;

        let case = h.orchestrator.case(case_id).unwrap();
        assert_eq!(case.status, CaseStatus::PartiallyFailed);

        let sub_a = case.subtask("patients").unwrap();
        assert_eq!(sub_a.state, SubtaskState::Ok);
        assert_eq!(sub_a.attempts, 1);

        let sub_b = case.subtask("appointments").unwrap();
        assert_eq!(sub_b.state, SubtaskState::Failed);
        assert_eq!(sub_b.attempts, 3);
        assert!(sub_b.error.as_ref().unwrap().contains("timeout"));

        assert_eq!(a.erases(), 1);
        assert_eq!(b.erases(), 3);
        assert_eq!(h.metrics.snapshot().subtask_retries, 2);
        assert_eq!(h.metrics.snapshot().subtask_failures, 1);
        assert_eq!(h.metrics.snapshot().cases_partially_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reinvokes_only_failed_subtasks() {
        let a = FakeService::new("patients", Behavior::Succeed);
        let b = FakeService::new("appointments", Behavior::FailTransient);
        let h = harness(vec![a.clone(), b.clone()]);

        let case_id = h
            .orchestrator
            .start_case("P-1", RightsOperation::Erase, staff())
            .await;
        assert_eq!(
            h.orchestrator.case(case_id).unwrap().status,
            CaseStatus::PartiallyFailed
        );

        b.set_behavior(Behavior::Succeed);
        let status = h.orchestrator.retry_case(case_id).await.unwrap();
        assert_eq!(status, CaseStatus::Completed);

        // The already-successful collaborator is not contacted again
        assert_eq!(a.erases(), 1);
        assert_eq!(b.erases(), 4);

        let case = h.orchestrator.case(case_id).unwrap();
        assert_eq!(case.subtask("patients").unwrap().attempts, 1);
        assert_eq!(case.subtask("appointments").unwrap().attempts, 4);
    }

    #[tokio::test]
    async fn test_retry_requires_partially_failed() {
        let a = FakeService::new("patients", Behavior::Succeed);
        let h = harness(vec![a]);

        let case_id = h
            .orchestrator
            .start_case("P-1", RightsOperation::Erase, staff())
            .await;
        assert_eq!(
            h.orchestrator.case(case_id).unwrap().status,
            CaseStatus::Completed
        );

        let result = h.orchestrator.retry_case(case_id).await;
        assert!(matches!(result, Err(CaseError::NotRetryable(_, _))));

        let result = h.orchestrator.retry_case(CaseId::new()).await;
        assert!(matches!(result, Err(CaseError::UnknownCase(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_partial_failure_marks_missing_section() {
        let a = FakeService::new("patients", Behavior::Succeed);
        let b = FakeService::new("appointments", Behavior::FailPermanent);
        let h = harness(vec![a.clone(), b.clone()]);

        let case_id = h
            .orchestrator
            .start_case("P-1", RightsOperation::Export, staff())
            .await;

        let case = h.orchestrator.case(case_id).unwrap();
        assert_eq!(case.status, CaseStatus::PartiallyFailed);

        let payload = case.export.unwrap();
        assert!(!payload.is_complete());
        assert_eq!(payload.sections.len(), 1);
        assert!(payload.sections.contains_key("patients"));
        assert_eq!(payload.missing, vec!["appointments".to_string()]);

        // Permanent failures are not retried
        assert_eq!(b.exports(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_case_cannot_be_retried() {
        let a = FakeService::new("patients", Behavior::Succeed);
        let b = FakeService::new("appointments", Behavior::FailTransient);
        let h = harness(vec![a.clone(), b.clone()]);

        let case_id = h
            .orchestrator
            .start_case("P-1", RightsOperation::Erase, staff())
            .await;
        assert_eq!(
            h.orchestrator.case(case_id).unwrap().status,
            CaseStatus::PartiallyFailed
        );

        h.orchestrator.cancel_case(case_id).unwrap();
        let erases_before = b.erases();

        let result = h.orchestrator.retry_case(case_id).await;
        assert!(matches!(result, Err(CaseError::Cancelled(_))));
        assert_eq!(b.erases(), erases_before);

        assert!(matches!(
            h.orchestrator.cancel_case(CaseId::new()),
            Err(CaseError::UnknownCase(_))
        ));
    }

    #[tokio::test]
    async fn test_erase_is_idempotent_across_cases() {
        let a = FakeService::new("patients", Behavior::Succeed);
        let h = harness(vec![a.clone()]);

        let first = h
            .orchestrator
            .start_case("P-1", RightsOperation::Erase, staff())
            .await;
        let second = h
            .orchestrator
            .start_case("P-1", RightsOperation::Erase, staff())
            .await;

        assert_eq!(
            h.orchestrator.case(first).unwrap().status,
            CaseStatus::Completed
        );
        assert_eq!(
            h.orchestrator.case(second).unwrap().status,
            CaseStatus::Completed
        );

        // Same end state either way: the subject is erased exactly once
        assert_eq!(a.erases(), 2);
        assert_eq!(a.erased.lock().len(), 1);
    }
}

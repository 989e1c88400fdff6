pub mod cache;
pub mod evaluator;

pub use cache::{CacheConfig, DecisionCache};
pub use evaluator::{EvaluationError, Evaluator};

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

use crate::attributes::AttributeResolver;
use crate::audit::{AuditEntry, AuditEvent, AuditSink};
use crate::domain::attributes::keys;
use crate::domain::decision::{Decision, Effect};
use crate::domain::policy::Policy;
use crate::domain::request::AccessRequest;
use crate::observability::EngineMetrics;
use crate::policy::PolicyRepository;

/// The policy decision point.
///
/// `evaluate` never fails outward: missing attributes, unreachable attribute
/// sources, absent policy, and malformed conditions all fold into a deny.
/// Every evaluation appends one audit record, cache hit or not.
pub struct DecisionEngine {
    repo: Arc<PolicyRepository>,
    resolver: Arc<AttributeResolver>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<EngineMetrics>,
    cache: DecisionCache,
}

impl DecisionEngine {
    pub fn new(
        repo: Arc<PolicyRepository>,
        resolver: Arc<AttributeResolver>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<EngineMetrics>,
        cache_config: CacheConfig,
    ) -> Self {
        DecisionEngine {
            repo,
            resolver,
            audit,
            metrics,
            cache: DecisionCache::new(cache_config),
        }
    }

    /// Evaluate an access request against the active policy version.
    pub async fn evaluate(&self, request: &AccessRequest) -> Decision {
        let policy = self.repo.active();
        let fingerprint = request.fingerprint();

        if let Some(decision) = self.cache.get(fingerprint, &policy.version) {
            debug!(rule_id = decision.rule_id_str(), "decision cache hit");
            self.metrics.record_decision(&decision, true);
            self.append_audit(request, &decision, true);
            return decision;
        }

        let decision = self.compute(request, &policy).await;
        self.cache
            .insert(fingerprint, &policy.version, decision.clone());
        self.metrics.record_decision(&decision, false);
        self.append_audit(request, &decision, false);
        decision
    }

    /// Contract name used by the consuming web layer.
    pub async fn decide(&self, request: &AccessRequest) -> Decision {
        self.evaluate(request).await
    }

    async fn compute(&self, request: &AccessRequest, policy: &Policy) -> Decision {
        let Some(resource_type) = request.resource_type() else {
            let mut decision = Decision::deny_default(&policy.version);
            decision
                .warnings
                .push("resource.type is missing from the request".to_string());
            return decision;
        };
        let action = request.action_type().unwrap_or("");

        let candidates = policy.candidates(resource_type, action);
        if candidates.is_empty() {
            return Decision::deny_default(&policy.version);
        }

        let mut referenced = BTreeSet::new();
        for rule in &candidates {
            rule.condition.collect_keys(&mut referenced);
        }
        let (resolved, warnings) = self.resolver.resolve_missing(request, &referenced).await;

        // Deny-overrides: the scan continues past a matching permit so that
        // any matching deny rule wins regardless of priority. Candidates are
        // in descending priority, so the reported rule is the
        // highest-priority one of its effect.
        let mut evaluator = Evaluator::new(request, &resolved);
        let mut permit: Option<&str> = None;
        let mut deny: Option<&str> = None;
        for rule in &candidates {
            match evaluator.eval(&rule.condition) {
                Ok(true) => {
                    if rule.effect == Effect::Deny {
                        deny = Some(&rule.id);
                        break;
                    }
                    if permit.is_none() {
                        permit = Some(&rule.id);
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    error!(rule_id = %rule.id, error = %e, "condition evaluation failed, failing closed");
                    self.metrics.record_evaluation_error();
                    deny = Some(&rule.id);
                    break;
                }
            }
        }

        let (effect, rule_id) = match (deny, permit) {
            (Some(id), _) => (Effect::Deny, Some(id.to_string())),
            (None, Some(id)) => (Effect::Permit, Some(id.to_string())),
            (None, None) => (Effect::Deny, None),
        };

        Decision {
            effect,
            rule_id,
            consulted_keys: evaluator.consulted_keys().cloned().collect(),
            warnings,
            policy_version: policy.version.clone(),
            evaluated_at: Utc::now(),
        }
    }

    fn append_audit(&self, request: &AccessRequest, decision: &Decision, cache_hit: bool) {
        let actor = request
            .subject
            .get_str(keys::USER_ID)
            .unwrap_or("anonymous");
        self.audit.record(AuditEntry::new(
            actor,
            AuditEvent::Decision {
                effect: decision.effect,
                rule_id: decision.rule_id_str().to_string(),
                resource_type: request.resource_type().unwrap_or("").to_string(),
                action: request.action_type().unwrap_or("").to_string(),
                consulted_keys: decision.consulted_keys.to_vec(),
                warnings: decision.warnings.clone(),
                policy_version: decision.policy_version.clone(),
                cache_hit,
            },
        ));
    }
}

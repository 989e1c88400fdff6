use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;

use custodian::attributes::AttributeResolver;
use custodian::audit::MemoryAuditSink;
use custodian::domain::attributes::keys;
use custodian::domain::policy::Condition;
use custodian::domain::request::AccessRequest;
use custodian::engine::{CacheConfig, DecisionEngine, Evaluator};
use custodian::observability::EngineMetrics;
use custodian::policy::{baseline_policy, PolicyRepository};

fn doctor_request() -> AccessRequest {
    AccessRequest::builder()
        .subject_attr(keys::USER_ID, "U-1")
        .subject_attr(keys::ROLE, "DOCTOR")
        .subject_attr(keys::DOCTOR_ID, "D-9")
        .subject_attr(keys::DEPARTMENT_ID, "CARDIO")
        .for_patient("P-1")
        .resource_attr(keys::DEPARTMENT_ID, "CARDIO")
        .resource_attr(keys::ASSIGNED_DOCTORS, ["D-2", "D-9"])
        .action("read")
        .build()
}

fn build_engine(cache: CacheConfig) -> DecisionEngine {
    DecisionEngine::new(
        Arc::new(PolicyRepository::new(baseline_policy()).unwrap()),
        Arc::new(AttributeResolver::new()),
        Arc::new(MemoryAuditSink::new()),
        Arc::new(EngineMetrics::new()),
        cache,
    )
}

fn bench_condition_eval(c: &mut Criterion) {
    let request = doctor_request();
    let resolved = BTreeMap::new();
    let condition = Condition::Any(vec![
        Condition::ContainsAttr {
            key: "resource.assignedDoctors".to_string(),
            other: "subject.doctorId".to_string(),
        },
        Condition::SameAs {
            key: "subject.departmentId".to_string(),
            other: "resource.departmentId".to_string(),
        },
    ]);

    c.bench_function("condition_eval", |b| {
        b.iter(|| {
            let mut evaluator = Evaluator::new(black_box(&request), &resolved);
            black_box(evaluator.eval(black_box(&condition)).unwrap())
        })
    });
}

fn bench_request_fingerprint(c: &mut Criterion) {
    let request = doctor_request();

    c.bench_function("request_fingerprint", |b| {
        b.iter(|| black_box(&request).fingerprint())
    });
}

fn bench_engine_evaluate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let request = doctor_request();

    let uncached = build_engine(CacheConfig::disabled());
    c.bench_function("engine_evaluate_uncached", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(uncached.evaluate(black_box(&request)).await) })
    });

    let cached = build_engine(CacheConfig::default());
    rt.block_on(cached.evaluate(&request));
    c.bench_function("engine_evaluate_cached", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(cached.evaluate(black_box(&request)).await) })
    });
}

criterion_group!(
    benches,
    bench_condition_eval,
    bench_request_fingerprint,
    bench_engine_evaluate
);
criterion_main!(benches);

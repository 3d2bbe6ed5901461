//! Performance benchmarks for vigil
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use vigil::{
    AuditConfig, AuditEvent, AuditEventType, AuditLogger, AuditSeverity, EventContext,
    EventOutcome, MetricsRegistry,
};

fn bench_event_creation(c: &mut Criterion) {
    let ctx = EventContext::default()
        .with_user("u-1")
        .with_client_ip("203.0.113.9");

    c.bench_function("AuditEvent::new", |b| {
        b.iter(|| {
            AuditEvent::new(
                AuditEventType::Auth,
                AuditSeverity::Info,
                "session",
                "login",
                EventOutcome::Success,
                "User logged in",
            )
            .with_context(&ctx)
            .with_detail("method", "password")
        });
    });
}

fn bench_event_serialization(c: &mut Criterion) {
    let event = AuditEvent::new(
        AuditEventType::Verification,
        AuditSeverity::Warning,
        "document",
        "verify",
        EventOutcome::Failure,
        "Hash mismatch",
    )
    .with_resource_id("doc-42")
    .with_detail("expectedHash", "2cf24dba5fb0a30e")
    .with_detail("attempts", 3i64);

    c.bench_function("AuditEvent serialize", |b| {
        b.iter(|| serde_json::to_vec(&event).unwrap());
    });

    let bytes = serde_json::to_vec(&event).unwrap();
    c.bench_function("AuditEvent deserialize", |b| {
        b.iter(|| serde_json::from_slice::<AuditEvent>(&bytes).unwrap());
    });
}

fn bench_log_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("log_throughput");
    for count in [100, 1000] {
        group.bench_function(format!("{} events", count), |b| {
            b.to_async(&rt).iter(|| async {
                let dir = tempfile::tempdir().unwrap();
                let logger = AuditLogger::new(AuditConfig {
                    log_dir: dir.path().to_path_buf(),
                    ..Default::default()
                })
                .unwrap();
                for i in 0..count {
                    logger.log_system_event(&format!("bench-{}", i), EventOutcome::Success, "");
                }
                logger.close().await;
            });
        });
    }
    group.finish();
}

fn bench_counter_increment(c: &mut Criterion) {
    let registry = Arc::new(MetricsRegistry::new());

    c.bench_function("increment_counter untagged", |b| {
        b.iter(|| registry.increment_counter("bench_counter", &[]));
    });

    c.bench_function("increment_counter tagged", |b| {
        b.iter(|| {
            registry.increment_counter(
                "bench_requests",
                &[("method", "GET"), ("path", "/documents"), ("status", "200")],
            )
        });
    });
}

criterion_group!(
    benches,
    bench_event_creation,
    bench_event_serialization,
    bench_log_throughput,
    bench_counter_increment,
);
criterion_main!(benches);

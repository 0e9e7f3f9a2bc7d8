//! Benchmarks for recovery backoff decisions using criterion.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vessel::{RecoveryDecision, RetryPolicy};

fn bench_compute_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_backoff");
    let policy = RetryPolicy::default();

    group.bench_function("first_attempt", |b| {
        b.iter(|| black_box(policy.compute_backoff(black_box(1))));
    });

    // Large attempts saturate at the cap.
    group.bench_function("saturated", |b| {
        b.iter(|| black_box(policy.compute_backoff(black_box(u16::MAX))));
    });

    group.finish();
}

fn bench_decide_until_escalation(c: &mut Criterion) {
    let policy = RetryPolicy::new(10, 100, 60_000);

    c.bench_function("decide_until_escalation", |b| {
        b.iter(|| {
            let mut attempts = 0u16;
            while let RecoveryDecision::Retry { attempt, delay } = policy.decide(attempts) {
                black_box(delay);
                attempts = attempt;
            }
            black_box(attempts);
        });
    });
}

criterion_group!(benches, bench_compute_backoff, bench_decide_until_escalation);
criterion_main!(benches);

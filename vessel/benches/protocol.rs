//! Benchmarks for the worker exchange format using criterion.
//!
//! These benchmarks measure:
//! - Encoding a work payload for a manifest build
//! - Decoding result records of both outcomes

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use std::path::PathBuf;

use vessel::{BuildManifest, FailureCause, JobId, ResultRecord, WorkPayload, WorkUnit};

/// A manifest build with a flow of `stages` stages and a few dependencies.
fn manifest_payload(stages: usize) -> WorkPayload {
    let flow = json!({
        "source": {"type": "kafka", "topic": "events", "brokers": ["b1:9092", "b2:9092"]},
        "stages": (0..stages)
            .map(|i| json!({"name": format!("stage_{i}"), "parallelism": 4, "sql": "SELECT * FROM t"}))
            .collect::<Vec<_>>(),
        "sink": {"type": "hdfs", "path": "/warehouse/events"},
    });
    let unit = BuildManifest {
        job_id: JobId::new("bench_job"),
        flow,
        dependencies: (0..4)
            .map(|i| PathBuf::from(format!("/opt/jobs/lib/connector-{i}.jar")))
            .collect(),
    };
    let params = serde_json::to_value(&unit).expect("serialize should succeed");
    WorkPayload::new(BuildManifest::KIND, params).with_classpath(vec![
        PathBuf::from("/opt/vessel/lib"),
        PathBuf::from("/opt/jobs/lib"),
    ])
}

fn success_record() -> ResultRecord {
    ResultRecord::Success {
        value: json!({
            "job_id": "bench_job",
            "flow_digest": format!("{:064x}", 42),
            "dependencies": ["/opt/jobs/lib/connector-0.jar"],
            "flow": {"source": {"type": "kafka"}},
        }),
    }
}

fn failure_record() -> ResultRecord {
    ResultRecord::Failure {
        cause: FailureCause::new("MissingDependency", "dependency connector-3.jar not found")
            .caused_by("classpath searched: /opt/vessel/lib, /opt/jobs/lib"),
    }
}

/// Benchmark: payload encoding.
///
/// Measures the parent side of a launch, from payload to bytes on disk.
fn bench_payload_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_encode");
    group.sample_size(100);

    for stages in [1usize, 16, 128] {
        let payload = manifest_payload(stages);
        group.throughput(Throughput::Bytes(
            serde_json::to_vec(&payload).expect("serialize should succeed").len() as u64,
        ));
        group.bench_function(format!("stages_{stages}"), |b| {
            b.iter(|| {
                let bytes = serde_json::to_vec(black_box(&payload)).expect("serialize should succeed");
                black_box(bytes);
            });
        });
    }

    group.finish();
}

/// Benchmark: result record decoding.
fn bench_result_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_decode");
    group.sample_size(100);

    let success = serde_json::to_vec(&success_record()).expect("serialize should succeed");
    let failure = serde_json::to_vec(&failure_record()).expect("serialize should succeed");

    group.throughput(Throughput::Bytes(success.len() as u64));
    group.bench_function("success", |b| {
        b.iter(|| {
            let record =
                ResultRecord::from_slice(black_box(&success)).expect("decode should succeed");
            black_box(record);
        });
    });

    group.throughput(Throughput::Bytes(failure.len() as u64));
    group.bench_function("failure", |b| {
        b.iter(|| {
            let record =
                ResultRecord::from_slice(black_box(&failure)).expect("decode should succeed");
            black_box(record);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_payload_encode, bench_result_decode);
criterion_main!(benches);

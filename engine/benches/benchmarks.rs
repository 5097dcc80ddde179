//! Performance benchmarks for vestry-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use vestry_engine::{
    EntityRecord, LogSnapshot, Mirror, MirrorSnapshot, Operation, PendingLog, Reconciliation,
    RetryPolicy, Schema,
};

fn member(i: u64) -> EntityRecord {
    EntityRecord::new(
        format!("member_{i}"),
        json!({"first_name": "Test", "last_name": format!("Member {i}"), "status": "member"})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    )
}

fn populated_mirror(size: u64) -> Mirror {
    let mut mirror = Mirror::new();
    for i in 0..size {
        let _ = mirror.apply("members", &Operation::insert(member(i)));
    }
    mirror
}

fn bench_mirror_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("mirror_operations");

    group.bench_function("apply_insert", |b| {
        let mut mirror = Mirror::new();
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            mirror.apply("members", black_box(&Operation::insert(member(id))))
        })
    });

    group.bench_function("apply_update_in_1000", |b| {
        let mut mirror = populated_mirror(1000);
        let patch = json!({"status": "visitor"}).as_object().cloned().unwrap_or_default();
        let op = Operation::update("member_999", patch);

        b.iter(|| mirror.apply("members", black_box(&op)))
    });

    group.bench_function("validate_insert", |b| {
        let schema = Schema::parish();
        let op = Operation::insert(member(1));

        b.iter(|| schema.validate_operation("members", black_box(&op)))
    });

    group.finish();
}

fn bench_pending_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_log");

    for size in [10u64, 100, 1000] {
        let mut log = PendingLog::new();
        for i in 0..size {
            log.enqueue("members", Operation::insert(member(i)), 1000 + i);
        }

        group.bench_with_input(BenchmarkId::new("encode", size), &log, |b, log| {
            b.iter(|| LogSnapshot::new(black_box(log.clone())).to_json())
        });

        group.bench_with_input(BenchmarkId::new("reconcile_pass", size), &log, |b, log| {
            b.iter(|| {
                let mut pass = Reconciliation::new(RetryPolicy::Requeue { max_attempts: 3 });
                for (i, entry) in log.entries().iter().enumerate() {
                    if i % 7 == 0 {
                        pass.failed(entry.clone(), "bench");
                    } else {
                        pass.succeeded(entry);
                    }
                }
                pass.finish()
            })
        });
    }

    group.finish();
}

fn bench_snapshots(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshots");

    for size in [100u64, 1000] {
        let mirror = populated_mirror(size);
        let json = MirrorSnapshot::new("members", mirror.records("members").to_vec())
            .to_json()
            .unwrap_or_default();

        group.bench_with_input(BenchmarkId::new("decode_mirror", size), &json, |b, json| {
            b.iter(|| MirrorSnapshot::from_json(black_box(json), "members"))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_mirror_operations,
    bench_pending_log,
    bench_snapshots
);
criterion_main!(benches);

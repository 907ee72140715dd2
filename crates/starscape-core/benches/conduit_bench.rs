//! Benchmarks for lifetime teardown and conduit notification.
//!
//! Run with: cargo bench -p starscape-core

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use starscape_core::{ConduitExt, Lifetime, LocalAction, LocalProperty, LocalSet, SetMember};

// ---------------------------------------------------------------------------
// 1. Cascading kill of a dependent tree
// ---------------------------------------------------------------------------

fn bench_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifetime/cascade");

    for count in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("dependents", count), &count, |b, &count| {
            b.iter(|| {
                let root = Lifetime::new();
                for _ in 0..count {
                    if let Ok(child) = root.new_dependent() {
                        let _ = child.add_callback(|| {});
                    }
                }
                root.kill();
                black_box(root.is_alive())
            })
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 2. Fan-out notification
// ---------------------------------------------------------------------------

fn bench_notify(c: &mut Criterion) {
    let mut group = c.benchmark_group("conduit/notify");

    for count in [1u64, 10, 100] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("action", count), &count, |b, &count| {
            let action = LocalAction::<u64>::new();
            let lifetime = Lifetime::new();
            for _ in 0..count {
                let _ = action.subscribe(&lifetime, |v: &u64| {
                    black_box(*v);
                });
            }
            let mut n = 0u64;
            b.iter(|| {
                n = n.wrapping_add(1);
                action.fire(n);
            })
        });

        group.bench_with_input(BenchmarkId::new("property", count), &count, |b, &count| {
            let property = LocalProperty::new(0u64);
            let lifetime = Lifetime::new();
            for _ in 0..count {
                let _ = property.subscribe(&lifetime, |v: &u64| {
                    black_box(*v);
                });
            }
            let mut n = 0u64;
            b.iter(|| {
                n = n.wrapping_add(1);
                black_box(property.set(n))
            })
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Set churn
// ---------------------------------------------------------------------------

fn bench_set_churn(c: &mut Criterion) {
    c.bench_function("set/add_delete_100", |b| {
        let set = LocalSet::<u32>::new();
        let lifetime = Lifetime::new();
        let _ = set.subscribe(&lifetime, |member: &SetMember<u32>| {
            black_box(member.value);
        });
        b.iter(|| {
            for i in 0..100 {
                set.add(i);
            }
            for i in 0..100 {
                set.delete(&i);
            }
        })
    });
}

criterion_group!(benches, bench_cascade, bench_notify, bench_set_churn);
criterion_main!(benches);

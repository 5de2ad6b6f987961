//! Benchmarks for the notification drain.
//!
//! Run with: cargo bench -p frel-runtime

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use frel_runtime::{DatumId, MetadataRegistry, NodeId, Runtime, Selector, Value};
use std::hint::black_box;

// ============================================================================
// Fan-out: one datum, many subscribers
// ============================================================================

fn fan_out(width: usize) -> (Runtime, DatumId) {
    let mut rt = Runtime::new(MetadataRegistry::new());
    let src = rt.create_datum("Src", [("v", Value::Int(0))], None).unwrap();
    for _ in 0..width {
        let c = rt.create_closure("Leaf", None).unwrap();
        rt.subscribe(src, c, Selector::key("v"), |rt, n| {
            let v = rt.get(n.source, "v")?;
            rt.set(n.target, "v", v).map(|_| ())
        })
        .unwrap();
    }
    rt.drain().unwrap();
    (rt, src)
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain/fan_out");

    for width in [10, 100, 1000] {
        let (mut rt, src) = fan_out(width);
        let mut next = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                rt.set(src, "v", next).unwrap();
                black_box(rt.drain().unwrap());
            })
        });
    }

    group.finish();
}

// ============================================================================
// Chain: depth-many waves per drain
// ============================================================================

fn chain(depth: usize) -> (Runtime, DatumId) {
    let mut rt = Runtime::new(MetadataRegistry::new());
    let src = rt.create_datum("Src", [("v", Value::Int(0))], None).unwrap();
    let mut prev: NodeId = src.into();
    for _ in 0..depth {
        let c = rt.create_closure("Link", None).unwrap();
        rt.subscribe(prev, c, Selector::key("v"), |rt, n| {
            let v = rt.get(n.source, "v")?;
            rt.set(n.target, "v", v).map(|_| ())
        })
        .unwrap();
        prev = c.into();
    }
    rt.drain().unwrap();
    (rt, src)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain/chain");

    for depth in [10, 100, 500] {
        let (mut rt, src) = chain(depth);
        let mut next = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                next += 1;
                rt.set(src, "v", next).unwrap();
                black_box(rt.drain().unwrap());
            })
        });
    }

    group.finish();
}

// ============================================================================
// No-op writes
// ============================================================================

fn bench_noop_set(c: &mut Criterion) {
    let (mut rt, src) = fan_out(100);
    c.bench_function("set/noop", |b| {
        b.iter(|| black_box(rt.set(src, "v", Value::Int(0)).unwrap()))
    });
}

criterion_group!(benches, bench_fan_out, bench_chain, bench_noop_set);
criterion_main!(benches);

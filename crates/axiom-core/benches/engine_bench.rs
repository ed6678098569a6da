//! # Engine Benchmarks
//!
//! Performance benchmarks for axiom-core.
//!
//! Run with: `cargo bench -p axiom-core`

use axiom_core::domain::DomainSnapshot;
use axiom_core::graph::GraphOptions;
use axiom_core::{
    DomainConfig, DomainId, Engine, EngineConfig, Graph, GraphStore, InputSignal, TokenId,
    TokenSpec, encode_snapshot,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn embedding(i: usize, dim: usize) -> Vec<f32> {
    (0..dim)
        .map(|k| if k == i % dim { 1.0 } else { 0.05 * ((i + k) % 7) as f32 })
        .collect()
}

/// An engine with `size` tokens spread over `domains` domains on a grid.
fn populated_engine(size: usize, domains: u32) -> Engine {
    let mut config = EngineConfig::default();
    config.domains = (1..=domains).map(|d| DomainConfig::new(d, format!("d{d}"))).collect();
    let engine = Engine::new(config).expect("engine");
    {
        let graph = engine.graph();
        let mut graph = graph.write();
        for i in 0..size {
            let domain = DomainId(1 + (i as u32 % domains));
            let position = vec![(i % 10) as f32 * 0.3, (i / 10) as f32 * 0.3, 0.0];
            graph
                .create_token(
                    TokenSpec::new(domain, embedding(i, 16))
                        .with_label(format!("w{i}"))
                        .with_position(position),
                )
                .expect("token");
        }
    }
    engine
}

/// A linear chain of tokens.
fn chain(size: usize) -> Graph {
    let mut graph = Graph::new(GraphOptions::default());
    let mut prev = None;
    for i in 0..size {
        let token = graph
            .create_token(TokenSpec::new(DomainId(1), embedding(i, 16)))
            .expect("token");
        if let Some(prev) = prev {
            graph.create_connection(prev, token, 1.0).expect("edge");
        }
        prev = Some(token);
    }
    graph
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for size in [50, 200, 500].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut engine = populated_engine(size, 4);
            b.iter(|| {
                let _ = engine.submit(InputSignal::word("w0"));
                black_box(engine.tick().expect("tick"))
            });
        });
    }

    group.finish();
}

fn bench_domain_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain_capture");

    for size in [100, 1000].iter() {
        let engine = populated_engine(*size, 1);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let graph = engine.graph();
            b.iter(|| black_box(DomainSnapshot::capture(&graph.read(), DomainId(1))));
        });
    }

    group.finish();
}

fn bench_shortest_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("shortest_path");

    for size in [100, 1000].iter() {
        let graph = chain(*size);
        let target = TokenId(*size as u64 - 1);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(graph.shortest_path(TokenId(0), target)));
        });
    }

    group.finish();
}

fn bench_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("nearest");

    for size in [100, 1000].iter() {
        let graph = chain(*size);
        let query = embedding(3, 16);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(graph.nearest(&query, 0.85)));
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 500].iter() {
        let engine = populated_engine(*size, 2);
        let snapshot = engine.snapshot();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(encode_snapshot(&snapshot)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_tick,
    bench_domain_capture,
    bench_shortest_path,
    bench_nearest,
    bench_snapshot,
);

criterion_main!(benches);

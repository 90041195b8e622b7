//! Build benchmarks: brute force vs NN-Descent at growing dataset sizes.
//!
//! Measures the point where the quadratic exact builder loses to the
//! iterative refinement, for a cheap scalar similarity.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use simgraph::build::{Brute, GraphBuilder, NnDescent, ThreadedBrute};
use simgraph::{Node, Similarity};

fn value_similarity() -> Arc<dyn Similarity<f64>> {
    Arc::new(|a: &f64, b: &f64| 1.0 / (1.0 + (a - b).abs()))
}

fn dataset(n: usize, seed: u64) -> Vec<Node<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| Node::new(i.to_string(), rng.random::<f64>() * 1_000_000.0))
        .collect()
}

fn bench_builders(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for &n in &[500usize, 1000, 2000] {
        group.bench_with_input(BenchmarkId::new("brute", n), &n, |b, &n| {
            b.iter(|| {
                let mut builder = Brute::new(10, value_similarity()).unwrap();
                black_box(builder.build(dataset(n, 42)).unwrap())
            })
        });

        group.bench_with_input(BenchmarkId::new("threaded_brute", n), &n, |b, &n| {
            b.iter(|| {
                let mut builder = ThreadedBrute::new(10, value_similarity()).unwrap();
                builder.set_block_size(256).unwrap();
                black_box(builder.build(dataset(n, 42)).unwrap())
            })
        });

        group.bench_with_input(BenchmarkId::new("nndescent", n), &n, |b, &n| {
            b.iter(|| {
                let mut builder = NnDescent::new(10, value_similarity()).unwrap();
                builder.set_seed(42);
                black_box(builder.build(dataset(n, 42)).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    group.sample_size(20);

    let mut builder = Brute::new(10, value_similarity()).unwrap();
    let graph = builder.build(dataset(5000, 42)).unwrap();

    group.bench_function("fast_search", |b| {
        b.iter(|| black_box(graph.fast_search(&123_456.0, 10).unwrap()))
    });
    group.bench_function("exhaustive", |b| {
        b.iter(|| black_box(graph.search_exhaustive(&123_456.0, 10).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_builders, bench_search);
criterion_main!(benches);

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hedoc::context::ContextManager;
use hedoc::engine::ComputeEngine;
use hedoc::params::HeConfig;
use hedoc::store::CiphertextStore;
use hedoc::Context;

fn test_params(poly_degree: usize) -> HeConfig {
    HeConfig {
        seed: Some(42),
        ..HeConfig::insecure_test(poly_degree)
    }
}

fn primitives_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitives");
    group.sample_size(20);

    for degree in [1024, 4096] {
        let ctx = Context::new(test_params(degree), 2).unwrap();
        let ev = ctx.evaluator();
        let values: Vec<f64> = (0..ctx.slot_count()).map(|i| (i % 17) as f64 - 8.0).collect();
        let a = ctx.encrypt_values(&values).unwrap();
        let b = ctx.encrypt_values(&values).unwrap();
        let product = ev.multiply(&a, &b).unwrap();

        group.bench_with_input(BenchmarkId::new("encode", degree), &degree, |bench, _| {
            bench.iter(|| ctx.encode(&values).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("encrypt", degree), &degree, |bench, _| {
            bench.iter(|| ctx.encrypt_values(&values).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decrypt", degree), &degree, |bench, _| {
            bench.iter(|| ctx.decrypt(&a).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("add", degree), &degree, |bench, _| {
            bench.iter(|| ev.add(&a, &b).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("multiply", degree), &degree, |bench, _| {
            bench.iter(|| ev.multiply(&a, &b).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("relinearize", degree), &degree, |bench, _| {
            bench.iter(|| ev.relinearize(&product).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("rotate", degree), &degree, |bench, _| {
            bench.iter(|| ev.rotate(&a, 1).unwrap());
        });
    }

    group.finish();
}

fn keygen_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("context");
    group.sample_size(10);

    for degree in [1024, 4096] {
        group.bench_with_input(BenchmarkId::new("initialize", degree), &degree, |bench, &n| {
            bench.iter(|| Context::new(test_params(n), 2).unwrap());
        });
    }

    group.finish();
}

fn encrypted_sum_benchmark(c: &mut Criterion) {
    let manager = Arc::new(ContextManager::new(Arc::new(CiphertextStore::new())));
    manager.initialize(test_params(2048), 0).unwrap();
    let engine = ComputeEngine::new(manager);

    let mut group = c.benchmark_group("encrypted_sum");
    group.sample_size(20);

    for count in [4usize, 16, 64] {
        let handles: Vec<_> = (0..count)
            .map(|i| engine.encrypt(&[i as f64; 32]).unwrap())
            .collect();

        group.bench_with_input(BenchmarkId::new("tree", count), &count, |bench, _| {
            bench.iter(|| {
                let sum = engine.encrypted_sum(&handles).unwrap();
                engine.release(&sum).unwrap();
            });
        });

        for handle in &handles {
            engine.release(handle).unwrap();
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    primitives_benchmark,
    keygen_benchmark,
    encrypted_sum_benchmark
);
criterion_main!(benches);

//! Benchmarks for param-projection fingerprinting and cache-key rendering.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use reqflow::fingerprint::fingerprint;
use reqflow::CacheKey;
use serde_json::json;

fn bench_fingerprint(c: &mut Criterion) {
    let small = json!({"id": 42, "region": "eu"});
    let nested = json!({
        "user": {"id": 42, "roles": ["admin", "ops"], "meta": {"a": 1, "b": 2}},
        "filters": [{"field": "created_at", "op": ">", "value": "2024-01-01"}],
        "page": {"size": 100, "cursor": null},
    });

    let mut group = c.benchmark_group("fingerprint");
    group.throughput(Throughput::Elements(1));
    group.bench_function("small_projection", |b| {
        b.iter(|| fingerprint(black_box(&small)))
    });
    group.bench_function("nested_projection", |b| {
        b.iter(|| fingerprint(black_box(&nested)))
    });
    group.finish();
}

fn bench_key_rendering(c: &mut Criterion) {
    let key = CacheKey::spec("orders/fetch", Some(json!({"id": 42, "region": "eu"})));
    let mut group = c.benchmark_group("cache_key");
    group.bench_function("render", |b| b.iter(|| black_box(&key).render()));
    group.bench_function("fs_path", |b| b.iter(|| black_box(&key).fs_path()));
    group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_key_rendering);
criterion_main!(benches);

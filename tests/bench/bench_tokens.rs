// Performance benchmarks for the request hot path: token checks and cache keys

use business_hub::core::token::TokenService;
use business_hub::state::{build_key, EntityKind, KeyPrefix};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn bench_token_issue(c: &mut Criterion) {
    let tokens = TokenService::new("bench-secret-that-is-long-enough-for-hs256", Duration::from_secs(3600)).unwrap();
    let subject = uuid::Uuid::new_v4().to_string();

    c.bench_function("token_issue", |b| {
        b.iter(|| {
            tokens.issue(black_box(&subject)).unwrap();
        });
    });
}

fn bench_token_verify(c: &mut Criterion) {
    let tokens = TokenService::new("bench-secret-that-is-long-enough-for-hs256", Duration::from_secs(3600)).unwrap();
    let token = tokens.issue(&uuid::Uuid::new_v4().to_string()).unwrap();

    c.bench_function("token_verify", |b| {
        b.iter(|| {
            tokens.verify(black_box(&token)).unwrap();
        });
    });
}

fn bench_build_key(c: &mut Criterion) {
    let id = uuid::Uuid::new_v4().to_string();

    c.bench_function("build_key_entity", |b| {
        b.iter(|| build_key(black_box(KeyPrefix::Entity(EntityKind::Business)), [black_box(id.as_str())]));
    });
    c.bench_function("build_key_list", |b| {
        b.iter(|| {
            build_key(
                black_box(KeyPrefix::EntityList(EntityKind::Business)),
                ["city=lyon", "category=bakery", "page=1"],
            )
        });
    });
}

criterion_group!(benches, bench_token_issue, bench_token_verify, bench_build_key);
criterion_main!(benches);

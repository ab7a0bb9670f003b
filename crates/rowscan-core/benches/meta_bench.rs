//! Meta cache and materializer benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rowscan_core::codec::{tuple_decoder, Kind};
use rowscan_core::meta::{count_sql, limit_sql};
use rowscan_core::scan::collect_rows;
use rowscan_core::{BufferedCursor, SqlMetaCache, Value};

const BASE: &str = "SELECT u.id, u.name FROM users u \
                    WHERE u.id IN (SELECT user_id FROM orders WHERE total > ?) \
                    ORDER BY u.name";

fn rewrite_benchmark(c: &mut Criterion) {
    c.bench_function("rewrite_limit", |b| {
        b.iter(|| black_box(limit_sql(black_box(BASE))))
    });

    c.bench_function("rewrite_count", |b| {
        b.iter(|| black_box(count_sql(black_box(BASE))))
    });
}

fn cache_hit_benchmark(c: &mut Criterion) {
    let cache = SqlMetaCache::new();
    let _ = cache.meta(BASE).derive_count();

    c.bench_function("meta_cache_hit", |b| {
        b.iter(|| {
            let meta = cache.meta(black_box(BASE));
            black_box(meta.derive_count().map(str::len))
        })
    });
}

fn collect_benchmark(c: &mut Criterion) {
    let rows: Vec<Vec<Value>> = (0..1000)
        .map(|i| vec![Value::Int64(i), Value::Text(format!("user-{i}"))])
        .collect();

    c.bench_function("collect_tuples_1000", |b| {
        b.iter(|| {
            let cursor = BufferedCursor::new(rows.clone());
            let decoded = collect_rows(cursor, tuple_decoder([Kind::Int64, Kind::Text]), 1000);
            black_box(decoded.map(|r| r.len()))
        })
    });
}

criterion_group!(
    benches,
    rewrite_benchmark,
    cache_hit_benchmark,
    collect_benchmark
);
criterion_main!(benches);

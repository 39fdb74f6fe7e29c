//! Bulk Load Benchmarks
//!
//! Compares the sort-based bulk loader with one-by-one incremental inserts
//! and measures pattern scans over the loaded store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ferro_tdb::{RawTriple, TdbConfig, TdbStore, Term, TriplePattern};
use tempfile::TempDir;

fn generate_triples(n: usize) -> Vec<RawTriple> {
    (0..n)
        .map(|i| {
            (
                Term::iri(format!("http://example.org/entity/{}", i / 10)),
                Term::iri(format!("http://example.org/prop/{}", i % 10)),
                Term::literal(format!("value {}", i)),
            )
        })
        .collect()
}

fn bench_config(dir: &TempDir) -> TdbConfig {
    TdbConfig::new(dir.path()).with_sync_writes(false)
}

/// Benchmark the bulk loader against incremental inserts
fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");
    group.sample_size(10);

    for size in [1_000, 10_000].iter() {
        let triples = generate_triples(*size);
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("bulk", size), &triples, |b, triples| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let mut store = TdbStore::create(bench_config(&dir)).unwrap();
                let stats = store
                    .bulk_load(triples.iter().cloned().map(Ok))
                    .unwrap();
                black_box(stats.distinct_triples);
            });
        });

        group.bench_with_input(
            BenchmarkId::new("incremental", size),
            &triples,
            |b, triples| {
                b.iter(|| {
                    let dir = TempDir::new().unwrap();
                    let mut store = TdbStore::create(bench_config(&dir)).unwrap();
                    for (s, p, o) in triples {
                        store.insert_triple(s, p, o).unwrap();
                    }
                    black_box(store.len());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark pattern scans on a loaded store
fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");
    let dir = TempDir::new().unwrap();
    let mut store = TdbStore::create(bench_config(&dir)).unwrap();
    store
        .bulk_load(generate_triples(50_000).into_iter().map(Ok))
        .unwrap();

    let subject = Term::iri("http://example.org/entity/42");
    let predicate_id = store
        .node_table()
        .lookup(&Term::iri("http://example.org/prop/3"))
        .unwrap();

    group.bench_function("subject_bound", |b| {
        b.iter(|| {
            let n = store
                .find_terms(Some(black_box(&subject)), None, None)
                .unwrap()
                .count();
            black_box(n);
        });
    });

    group.bench_function("predicate_bound", |b| {
        b.iter(|| {
            let n = store
                .find_ids(&TriplePattern::new(None, predicate_id, None))
                .unwrap()
                .count();
            black_box(n);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_load, bench_find);
criterion_main!(benches);

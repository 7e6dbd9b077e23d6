// Benchmarks for the matching hot paths
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fuzzrec_core::{MinHashLsh, MinHasher, Record, StatsModel};
use fuzzrec_similarity::{FieldWeights, Scorer};
use rand::prelude::*;
use std::sync::Arc;

const WORDS: &[&str] = &[
    "ACME", "GENERAL", "HOSPITAL", "MEDICAL", "CENTER", "SAINT", "MARY", "COUNTY", "REGIONAL", "CLINIC",
    "NORTH", "SOUTH", "VALLEY", "MEMORIAL", "COMMUNITY", "HEALTH", "CARE", "UNIVERSITY", "CHILDRENS", "MERCY",
];

fn random_name(rng: &mut impl Rng) -> String {
    let len = rng.random_range(2..5);
    (0..len)
        .map(|_| WORDS[rng.random_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn universe(size: usize) -> (Vec<Record>, Arc<StatsModel>) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut records: Vec<Record> = (0..size)
        .map(|i| Record::from_raw([("NAME", random_name(&mut rng)), ("ZIP", format!("{:05}", i % 997))]))
        .collect();
    let stats = StatsModel::build(&mut records);
    (records, Arc::new(stats))
}

fn benchmark_signature(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature");
    for num_perm in [64, 128, 256].iter() {
        let hasher = MinHasher::new(*num_perm, 1);
        group.bench_with_input(BenchmarkId::new("value_signature", num_perm), num_perm, |b, _| {
            b.iter(|| black_box(hasher.value_signature(black_box("SAINT MARY REGIONAL MEDICAL CENTER"))));
        });
    }
    group.finish();
}

fn benchmark_lsh_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("lsh_query");
    let hasher = MinHasher::new(128, 1);
    for size in [1000, 10000].iter() {
        let (records, _) = universe(*size);
        let mut lsh = MinHashLsh::new(0.6, 128).unwrap();
        for (position, record) in records.iter().enumerate() {
            let sig = hasher.value_signature(record.get("NAME").unwrap());
            lsh.insert(position as u32, &sig).unwrap();
        }
        let query = hasher.value_signature("SAINT MARYS REGIONAL MEDICAL");
        group.bench_with_input(BenchmarkId::new("query", size), size, |b, _| {
            b.iter(|| black_box(lsh.query(black_box(&query)).unwrap()));
        });
    }
    group.finish();
}

fn benchmark_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");
    let (records, stats) = universe(5000);
    let scorer = Scorer::new(FieldWeights::uniform(&["NAME", "ZIP"]).unwrap(), stats.clone());
    let mut query = Record::from_raw([("NAME", "SAINT MARYS REGIONL MEDICAL CTR"), ("ZIP", "00042")]);
    query.meta = Some(stats.target_metadata(&query, &["NAME".to_string(), "ZIP".to_string()]));

    group.bench_function("bow_sim", |b| {
        b.iter(|| black_box(scorer.bow_sim("NAME", black_box(&query), &records[0])));
    });
    group.bench_function("rank_100", |b| {
        b.iter(|| {
            let ranking = scorer.rank(&query, records[..100].iter().cloned(), 0.0);
            black_box(ranking.len())
        });
    });
    group.finish();
}

fn benchmark_stats_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats_build");
    group.sample_size(10);
    let (records, _) = universe(2000);
    group.bench_function("build_2000", |b| {
        b.iter(|| {
            let mut batch: Vec<Record> = records.iter().cloned().map(Record::without_meta).collect();
            black_box(StatsModel::build(&mut batch))
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_signature, benchmark_lsh_query, benchmark_scoring, benchmark_stats_build);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use aspir::database::Database;
use aspir::paillier::key_gen;

const SLOT_BYTES: usize = 32;

fn bench_build_database(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_database");

    for db_size in [1_000, 10_000, 100_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(db_size),
            &db_size,
            |b, &db_size| {
                b.iter(|| {
                    let mut rng = rand::rng();
                    Database::random(db_size, SLOT_BYTES, &mut rng)
                });
            },
        );
    }

    group.finish();
}

fn bench_secret_shared_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("secret_shared_query");
    group.sample_size(20);

    let mut rng = rand::rng();
    let db = Database::random(65_536, SLOT_BYTES, &mut rng);
    let shares = db.meta.new_index_query_shares(0, 1, 2, &mut rng).unwrap();

    for nprocs in [1usize, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(nprocs), &nprocs, |b, &nprocs| {
            b.iter(|| db.private_secret_shared_query(&shares[0], nprocs).unwrap());
        });
    }

    group.finish();
}

fn bench_encrypted_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypted_query");
    group.sample_size(10);

    let mut rng = rand::rng();
    let (_sk, pk) = key_gen(1024, &mut rng);
    let db = Database::random(1_024, SLOT_BYTES, &mut rng);
    let query = db.meta.new_encrypted_query(&pk, 1, Some(0), &mut rng).unwrap();

    for nprocs in [1usize, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(nprocs), &nprocs, |b, &nprocs| {
            b.iter(|| db.private_encrypted_query(&query, nprocs).unwrap());
        });
    }

    group.finish();
}

fn bench_doubly_encrypted_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("doubly_encrypted_query");
    group.sample_size(10);

    let mut rng = rand::rng();
    let (_sk, pk) = key_gen(1024, &mut rng);
    let db = Database::random(1_024, SLOT_BYTES, &mut rng);
    let query = db
        .meta
        .new_doubly_encrypted_query(&pk, 1, Some(0), &mut rng)
        .unwrap();

    for nprocs in [1usize, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(nprocs), &nprocs, |b, &nprocs| {
            b.iter(|| db.private_doubly_encrypted_query(&query, nprocs).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_build_database,
    bench_secret_shared_query,
    bench_encrypted_query,
    bench_doubly_encrypted_query
);
criterion_main!(benches);

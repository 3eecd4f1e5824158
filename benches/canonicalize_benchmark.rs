use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statmunge::canonicalize::canonicalize;
use statmunge::identity::identity_key;
use statmunge::types::{Field, MappedRecord, MappedTable};

const BASES: [&str; 4] = ["A", "C", "G", "T"];

fn random_table(rows: usize) -> MappedTable {
    let mut rng = StdRng::seed_from_u64(0x5EED_5AFE + rows as u64);
    let records = (0..rows)
        .map(|_| {
            let ea = rng.gen_range(0..4);
            let nea = (ea + rng.gen_range(1..4)) % 4;
            let chrom = rng.gen_range(1..=23).to_string();
            // A narrow position range produces a realistic share of duplicate keys.
            let pos = rng.gen_range(1..(rows as u32 * 4).max(2)).to_string();
            let p = format!("{:e}", rng.r#gen::<f64>().max(1e-300));
            let beta = format!("{}", rng.gen_range(-1.0..1.0));
            let se = format!("{}", rng.gen_range(0.01..0.5));
            let eaf = format!("{}", rng.r#gen::<f64>());
            MappedRecord::from_pairs([
                (Field::Chr, chrom.as_str()),
                (Field::Bp, pos.as_str()),
                (Field::Ea, BASES[ea]),
                (Field::Nea, BASES[nea]),
                (Field::P, p.as_str()),
                (Field::Beta, beta.as_str()),
                (Field::Se, se.as_str()),
                (Field::Eaf, eaf.as_str()),
            ])
        })
        .collect();
    MappedTable::from_records(records)
}

fn benchmark_identity_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_key");
    group.throughput(Throughput::Elements(1));
    group.bench_function("snv", |b| {
        b.iter(|| black_box(identity_key(black_box(7), black_box(100_000), "G", "A")));
    });
    group.bench_function("indel", |b| {
        b.iter(|| black_box(identity_key(black_box(7), black_box(100_000), "A", "ACGTT")));
    });
    group.finish();
}

fn benchmark_canonicalize(c: &mut Criterion) {
    let sizes = [1_000_usize, 10_000, 100_000];
    let tables: Vec<_> = sizes.iter().map(|&n| (n, random_table(n))).collect();

    let mut group = c.benchmark_group("canonicalize");
    group.sample_size(10);
    for (size, table) in &tables {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), table, |b, input| {
            b.iter(|| {
                let out = canonicalize(black_box(input.clone())).map(|t| t.len());
                black_box(out.ok());
            });
        });
    }
    group.finish();
}

criterion_group!(munging, benchmark_identity_key, benchmark_canonicalize);
criterion_main!(munging);

//! Benchmarks for datapile entry writes and indexed lookups

use std::io::Cursor;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use datapile::{Attributes, Compression, Config, DataPile};

type MemoryPile = DataPile<Cursor<Vec<u8>>>;

fn memory_pile(config: Config) -> MemoryPile {
    DataPile::create_streams(
        Cursor::new(Vec::new()),
        Cursor::new(Vec::new()),
        Cursor::new(Vec::new()),
        config,
    )
    .unwrap()
}

fn add_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");
    let payload = vec![0x5Au8; 64 * 1024];
    group.throughput(Throughput::Bytes(payload.len() as u64));

    for (label, compression) in [("plain", Compression::None), ("gzip", Compression::Gzip)] {
        let config = Config::builder().compression(compression).build().unwrap();
        group.bench_function(label, |b| {
            b.iter_batched(
                || memory_pile(config.clone()),
                |mut pile| {
                    for i in 0..16 {
                        let attrs = Attributes::new().with("seq", format!("{:08}", i), true);
                        pile.add(&payload, attrs).unwrap();
                    }
                    pile
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn find_benchmarks(c: &mut Criterion) {
    let mut pile = memory_pile(Config::default());
    for i in 0..5_000u32 {
        let attrs = Attributes::new()
            .with("name", format!("entry_{:06}", i), true)
            .with("group", format!("g{}", i % 10), true);
        pile.add(b"x", attrs).unwrap();
    }

    c.bench_function("find/unique", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 7919) % 5_000;
            pile.find("name", &format!("entry_{:06}", i)).unwrap()
        })
    });

    c.bench_function("find/run_of_500", |b| {
        b.iter(|| pile.find("group", "g3").unwrap())
    });
}

criterion_group!(benches, add_benchmarks, find_benchmarks);
criterion_main!(benches);

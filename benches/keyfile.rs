//! Keyed file benchmarks
//!
//! These benchmarks measure the block codec, the key encoding helpers and
//! point operations through the public `Keyfile` API.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box as hint_black_box;
use tempfile::tempdir;

use keyfile::config::{BLOCK_LC, MIN_FCB_LC};
use keyfile::encoding::{compress_u64, create_key, uncompress_u64};
use keyfile::storage::entry::fits;
use keyfile::storage::{decode_block, encode_block, DiskOrder, Entry, EntryValue, IndexBlock};
use keyfile::{IndexId, Keyfile};

fn key(i: usize) -> Vec<u8> {
    format!("term/{:08}", i).into_bytes()
}

fn full_leaf() -> IndexBlock {
    let mut entries = Vec::new();
    let mut i = 0;
    loop {
        entries.push(Entry::new(key(i), EntryValue::Embedded(vec![i as u8; 8])));
        if !fits(&entries) {
            entries.pop();
            break;
        }
        i += 1;
    }
    let mut block = IndexBlock::new(IndexId::User, 0);
    block.pack(&entries).unwrap();
    block
}

fn bench_varint(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint");

    for (value, name) in [(3u64, "1_byte"), (70_000, "3_byte"), (u64::MAX, "max_u64")] {
        group.bench_with_input(BenchmarkId::new("compress", name), &value, |b, &value| {
            let mut buf = [0u8; 10];
            b.iter(|| hint_black_box(compress_u64(black_box(value), &mut buf)));
        });

        let mut buf = [0u8; 10];
        let len = compress_u64(value, &mut buf);
        group.bench_with_input(BenchmarkId::new("uncompress", name), &buf[..len], |b, data| {
            b.iter(|| hint_black_box(uncompress_u64(black_box(data)).unwrap()));
        });
    }

    group.bench_function("create_key", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n = n.wrapping_add(7919);
            hint_black_box(create_key(black_box(n)))
        });
    });

    group.finish();
}

fn bench_block_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_codec");
    group.throughput(Throughput::Bytes(BLOCK_LC as u64));

    let block = full_leaf();
    let mut image = vec![0u8; BLOCK_LC];

    group.bench_function("encode", |b| {
        b.iter(|| {
            encode_block::<DiskOrder>(black_box(&block), &mut image).unwrap();
            hint_black_box(image[0])
        });
    });

    encode_block::<DiskOrder>(&block, &mut image).unwrap();
    group.bench_function("decode", |b| {
        let mut decoded = IndexBlock::new(IndexId::User, 0);
        b.iter(|| {
            decode_block::<DiskOrder>(black_box(&image), &mut decoded).unwrap();
            hint_black_box(decoded.keys_in_block())
        });
    });

    let middle = key(block.keys_in_block() / 2);
    group.bench_function("search", |b| {
        b.iter(|| hint_black_box(block.search(black_box(&middle)).unwrap()));
    });

    group.finish();
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for count in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let kf = Keyfile::create(dir.path().join("bench.kf"), 1 << 20).unwrap();
                    (dir, kf)
                },
                |(dir, mut kf)| {
                    for i in 0..count {
                        kf.put(&key(i), b"posting").unwrap();
                    }
                    kf.close().unwrap();
                    drop(dir);
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("permuted", count), &count, |b, &count| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let kf = Keyfile::create(dir.path().join("bench.kf"), 1 << 20).unwrap();
                    (dir, kf)
                },
                |(dir, mut kf)| {
                    for i in 0..count {
                        kf.put(&key((i * 7919) % count), b"posting").unwrap();
                    }
                    kf.close().unwrap();
                    drop(dir);
                },
            );
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    let count = 20_000;

    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.kf");
    {
        let mut kf = Keyfile::create(&path, 1 << 20).unwrap();
        for i in 0..count {
            let record = vec![(i % 251) as u8; 8 + i % 120];
            kf.put(&key(i), &record).unwrap();
        }
        kf.close().unwrap();
    }

    for (cache, name) in [(MIN_FCB_LC, "min_cache"), (1 << 20, "1mb_cache")] {
        let mut kf = Keyfile::open_read(&path, cache).unwrap();

        group.bench_function(BenchmarkId::new("random", name), |b| {
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 7919) % count;
                hint_black_box(kf.get(black_box(&key(i))).unwrap())
            });
        });

        group.bench_function(BenchmarkId::new("sequential", name), |b| {
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % count;
                hint_black_box(kf.get(black_box(&key(i))).unwrap())
            });
        });
    }

    group.bench_function("scan", |b| {
        let mut kf = Keyfile::open_read(&path, 1 << 20).unwrap();
        b.iter(|| {
            kf.set_bof(IndexId::User).unwrap();
            let mut n = 0;
            while kf.next_entry(IndexId::User).unwrap().is_some() {
                n += 1;
            }
            hint_black_box(n)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_varint, bench_block_codec, bench_put, bench_get);
criterion_main!(benches);

//! Scanner throughput benchmarks.
//!
//! Measures:
//! - Forward scans over a NOP sled (worst case: no match until the end)
//! - Literal-pool scans comparing pool contents at every load
//! - A full gen 3 signature check pass
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use iboot_patcher::scanner::{find_next_bl, find_next_literal_load, find_next_movw, find_prev_bl};
use iboot_patcher::thumb::{patterns, Bl, Instruction, LdrLiteral, MovWide, Movw};
use iboot_patcher::{patch_bytes, PatchOptions};

const IMAGE_LEN: usize = 0x8_0000;

fn nop_image() -> Vec<u8> {
    patterns::NOP.to_le_bytes().repeat(IMAGE_LEN / 2)
}

/// A gen 3 image whose patch sites all sit near the end.
fn sigcheck_image() -> Vec<u8> {
    let mut data = nop_image();
    data[..0x300].fill(0);
    data[0x20..0x24].copy_from_slice(&0x5FF0_0040u32.to_le_bytes());
    data[0x280..0x28D].copy_from_slice(b"iBoot-700.1.2");

    let base = IMAGE_LEN - 0x1000;
    for (i, tag) in [b"DORP", b"OPES", b"DROB", b"DICE"].iter().enumerate() {
        let at = base + i * 0x80;
        let ldr = LdrLiteral::to_pool(0, at, at + 0x40).unwrap();
        data[at..at + 2].copy_from_slice(&ldr.encode());
        data[at + 0x40..at + 0x44].copy_from_slice(&tag[..]);
        let bl = Bl::to(at + 4, base + 0xC00).unwrap();
        data[at + 4..at + 8].copy_from_slice(&bl.encode());
    }
    let movw = Movw { rd: 0, imm16: 0x414 };
    data[base + 0x200..base + 0x204].copy_from_slice(&movw.encode());
    let mov = MovWide::with_value(1, 0xFFFF_FFFF).unwrap();
    data[base + 0x210..base + 0x214].copy_from_slice(&mov.encode());
    data
}

fn bench_scans(c: &mut Criterion) {
    let data = nop_image();
    let mut group = c.benchmark_group("scan_miss");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("find_next_bl", |b| {
        b.iter(|| find_next_bl(black_box(&data), 0, 0))
    });

    group.bench_function("find_prev_bl", |b| {
        b.iter(|| find_prev_bl(black_box(&data), data.len(), 0, 0))
    });

    group.bench_function("find_next_movw", |b| {
        b.iter(|| find_next_movw(black_box(&data), 0, 0, Some(0x414)))
    });

    group.bench_function("find_next_literal_load", |b| {
        b.iter(|| find_next_literal_load(black_box(&data), 0, 0, b"DORP"))
    });

    group.finish();
}

fn bench_sigcheck(c: &mut Criterion) {
    let data = sigcheck_image();
    let options = PatchOptions::new();
    let mut group = c.benchmark_group("patch");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("gen3_sigcheck", |b| {
        b.iter(|| patch_bytes(black_box(&data), &options).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_scans, bench_sigcheck);
criterion_main!(benches);

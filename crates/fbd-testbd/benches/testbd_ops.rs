//! Benchmark: simulation overhead of `TestBd` over a bare `RamBd`.
//!
//! The test device validates geometry, consults the wear policy and, with
//! erase emulation on, reads back every programmed region before writing.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fbd_block::{RamBd, RamBdConfig, RawBlockDevice};
use fbd_testbd::{TestBd, TestBdConfig};
use fbd_types::{BlockIndex, EraseValue, Geometry};

const GEOMETRY: Geometry = Geometry {
    read_size: 16,
    prog_size: 16,
    erase_size: 4096,
    erase_count: 64,
};

fn config(erase_value: EraseValue) -> TestBdConfig {
    TestBdConfig {
        erase_value,
        erase_cycles: 1_000_000,
        ..TestBdConfig::with_geometry(GEOMETRY)
    }
}

fn bench_erase_program_block(c: &mut Criterion) {
    let page = vec![0x5A_u8; 256];
    let mut group = c.benchmark_group("erase_program_block");

    group.bench_function("rambd", |b| {
        let mut bd = RamBd::new(GEOMETRY, &RamBdConfig::default()).unwrap();
        b.iter(|| {
            bd.erase(BlockIndex(7)).unwrap();
            for off in (0..GEOMETRY.erase_size).step_by(page.len()) {
                bd.program(BlockIndex(7), off, black_box(&page)).unwrap();
            }
        });
    });

    let variants = [
        ("testbd_fill", EraseValue::Fill(0xFF)),
        ("testbd_none", EraseValue::None),
    ];
    for (name, erase_value) in variants {
        group.bench_function(name, |b| {
            let mut bd = TestBd::create(&config(erase_value), None).unwrap();
            b.iter(|| {
                // Keep the block below the wear threshold.
                bd.set_wear(BlockIndex(7), 0).unwrap();
                bd.erase(BlockIndex(7)).unwrap();
                for off in (0..GEOMETRY.erase_size).step_by(page.len()) {
                    bd.program(BlockIndex(7), off, black_box(&page)).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut buf = vec![0_u8; 512];
    let mut group = c.benchmark_group("read_512");

    group.bench_function("rambd", |b| {
        let mut bd = RamBd::new(GEOMETRY, &RamBdConfig::default()).unwrap();
        b.iter(|| bd.read(BlockIndex(3), black_box(1024), &mut buf).unwrap());
    });

    group.bench_function("testbd", |b| {
        let mut bd = TestBd::create(&config(EraseValue::Fill(0xFF)), None).unwrap();
        b.iter(|| bd.read(BlockIndex(3), black_box(1024), &mut buf).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_erase_program_block, bench_read);
criterion_main!(benches);

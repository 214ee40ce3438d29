// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Throughput of the SPSC byte-ring under a single producer/consumer pair
// running in lockstep, at a few representative record sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vrouter_core::ring::OwnedRing;

fn enqueue_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_enqueue_dequeue");
    for record_len in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(record_len), &record_len, |b, &record_len| {
            let mut owned = OwnedRing::new(1 << 20);
            let ring = owned.view();
            let payload = vec![0xABu8; record_len];
            b.iter(|| {
                ring.enqueue(black_box(&payload)).unwrap();
                let buf = ring.dequeue_buf().unwrap();
                black_box(buf);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, enqueue_dequeue);
criterion_main!(benches);

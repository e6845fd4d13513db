use hzblocks_core::prelude::*;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn hz_address_of_every_point(c: &mut Criterion) {
    let mut group = c.benchmark_group("hz_address_of_every_point");
    for size in CUBE_SIZES.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_with_setup(
                || set_up_hz_order(size),
                |(hz, dims)| {
                    for p in PointNi::iter_range(PointNi::zero(3), dims, PointNi::one(3)) {
                        black_box(hz.address(&p));
                    }
                },
            );
        });
    }
    group.finish();
}

fn hz_point_of_every_address(c: &mut Criterion) {
    let mut group = c.benchmark_group("hz_point_of_every_address");
    for size in CUBE_SIZES.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_with_setup(
                || set_up_hz_order(size),
                |(hz, dims)| {
                    for address in 0..dims.product() as u64 {
                        black_box(hz.point(address));
                    }
                },
            );
        });
    }
    group.finish();
}

criterion_group!(benches, hz_address_of_every_point, hz_point_of_every_address);
criterion_main!(benches);

const CUBE_SIZES: [i64; 3] = [16, 32, 64];

fn set_up_hz_order(size: i64) -> (HzOrder, PointNi) {
    let dims = PointNi::fill(3, size);
    let bitmask = Bitmask::guess('V', &dims, false);

    (HzOrder::new(&bitmask), dims)
}

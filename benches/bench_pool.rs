use archetype_loader::pool::BufferPool;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_pool_rent_return(c: &mut Criterion) {
    let pool = BufferPool::default();
    // warm one buffer per class we touch
    drop(pool.rent(64 * 1024));

    c.bench_function("pool_rent_return_64k", |b| {
        b.iter(|| {
            let buffer = pool.rent(black_box(64 * 1024));
            black_box(buffer.len());
        });
    });
}

fn bench_direct_alloc(c: &mut Criterion) {
    c.bench_function("direct_alloc_64k", |b| {
        b.iter(|| {
            let buffer = vec![0u8; black_box(64 * 1024)];
            black_box(buffer.len());
        });
    });
}

fn bench_pool_mixed_sizes(c: &mut Criterion) {
    let pool = BufferPool::new(8);
    let sizes = [1500usize, 3000, 70_000, 500_000, 2_000_000];

    c.bench_function("pool_mixed_sizes", |b| {
        b.iter(|| {
            let held: Vec<_> = sizes.iter().map(|&size| pool.rent(size)).collect();
            black_box(held.len());
        });
    });
}

criterion_group!(
    benches,
    bench_pool_rent_return,
    bench_direct_alloc,
    bench_pool_mixed_sizes
);
criterion_main!(benches);

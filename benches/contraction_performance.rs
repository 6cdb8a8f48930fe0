//! Contraction pipeline benchmarks
//!
//! Measures the end-to-end expression pipeline (engines + SUMMA evaluator)
//! on a single-rank world, and the bare tile gemm kernel for comparison.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use mosaic::{DistArray, GemmHelper, Range, Tensor, TiledRange, TransposeFlag, World};

fn filled(world: &World, n: usize, block: usize) -> DistArray<f64> {
    let array = DistArray::new_dense(world, TiledRange::from_uniform(&[n, n], &[block, block]))
        .expect("dense constructor");
    array
        .init_tiles(
            |range| Tensor::from_fn(range.clone(), |c| ((c[0] * 31 + c[1] * 17) % 13) as f64),
            false,
        )
        .expect("tile initialization");
    array
}

fn bench_expression_contraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression_contraction");
    for &(n, block) in &[(32usize, 8usize), (64, 16), (64, 8)] {
        group.throughput(Throughput::Elements((n * n * n) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{n}x{n}/b{block}")),
            &(n, block),
            |bencher, &(n, block)| {
                let world = World::local();
                let a = filled(&world, n, block);
                let b = filled(&world, n, block);
                bencher.iter(|| {
                    let mut out = DistArray::<f64>::default();
                    out.assign(
                        "i,j",
                        a.idx("i,k").expect("labels") * b.idx("k,j").expect("labels"),
                    )
                    .expect("contraction");
                    black_box(out.tile(0).expect("first tile"));
                });
                DistArray::<f64>::wait_for_lazy_cleanup(&world).expect("cleanup drains");
            },
        );
    }
    group.finish();
}

fn bench_tile_gemm(c: &mut Criterion) {
    let mut group = c.benchmark_group("tile_gemm");
    let helper = GemmHelper::new(TransposeFlag::NoTrans, TransposeFlag::NoTrans, 2, 2, 2);
    for &n in &[16usize, 64] {
        group.throughput(Throughput::Elements((n * n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bencher, &n| {
            let a = Tensor::from_fn(Range::from_extents(&[n, n]), |c| (c[0] + c[1]) as f64);
            let b = Tensor::from_fn(Range::from_extents(&[n, n]), |c| (c[0] * 2 + c[1]) as f64);
            bencher.iter(|| black_box(a.gemm(&b, 1.0, &helper)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_expression_contraction, bench_tile_gemm);
criterion_main!(benches);

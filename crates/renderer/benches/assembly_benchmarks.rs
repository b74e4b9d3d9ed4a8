//! Benchmarks for planning, tile placement and PNG encoding.
//!
//! Run with: cargo bench --package renderer --bench assembly_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mapgen_common::RenderOptions;
use renderer::{plan, png, OutputImage, RasterTile};

fn options(width: u32, height: u32) -> RenderOptions {
    RenderOptions {
        width,
        height,
        ..RenderOptions::default()
    }
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    for size in [1000u32, 5000, 20000] {
        let opts = options(size, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &opts, |b, opts| {
            b.iter(|| plan(black_box(opts), 1000))
        });
    }
    group.finish();
}

fn bench_write_tiles(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_tiles");
    for size in [2000u32, 4000] {
        let p = plan(&options(size, size), 1000).unwrap();
        let raster = RasterTile::filled(p.tile_physical_width, p.tile_physical_height, [30, 60, 90, 255]);
        group.throughput(Throughput::Bytes(p.output_len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &p, |b, p| {
            b.iter(|| {
                let mut img = OutputImage::for_plan(p);
                for tile in &p.tiles {
                    img.write_tile(tile, &raster).unwrap();
                }
                black_box(img)
            })
        });
    }
    group.finish();
}

fn bench_png(c: &mut Criterion) {
    let mut group = c.benchmark_group("png_encode");
    group.sample_size(20);
    for size in [1000usize, 3000] {
        let pixels = vec![128u8; size * size * 4];
        group.throughput(Throughput::Bytes(pixels.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &pixels, |b, pixels| {
            b.iter(|| png::create_png(black_box(pixels), size, size).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan, bench_write_tiles, bench_png);
criterion_main!(benches);

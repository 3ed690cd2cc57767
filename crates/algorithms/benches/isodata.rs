//! Benchmarks for ISODATA clustering

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use imgcalc_algorithms::classification::{InitStrategy, IsodataParams, isodata};
use imgcalc_algorithms::imagecalc::border_edges;
use imgcalc_core::{GeoTransform, MemorySink, MultiBandRaster};
use imgcalc_engine::EngineConfig;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn create_image(size: usize, bands: usize) -> MultiBandRaster {
    let mut r = MultiBandRaster::new(bands, size, size);
    r.set_transform(GeoTransform::new(0.0, size as f64, 1.0, -1.0));
    for b in 0..bands {
        for row in 0..size {
            for col in 0..size {
                let v = 1.0 + ((row * 7 + col * 13 + b * 31) % 200) as f64;
                r.set(b, row, col, v).unwrap();
            }
        }
    }
    r
}

fn bench_isodata(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification/isodata");
    group.sample_size(10);
    let params = IsodataParams {
        max_iterations: 10,
        min_num_vals: 5,
        ..Default::default()
    };
    for size in [128, 256, 512] {
        let image = create_image(size, 3);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let mut rng = StdRng::seed_from_u64(42);
                let mut sink = MemorySink::new();
                isodata(
                    vec![black_box(&image)],
                    6,
                    InitStrategy::KMeansPlusPlus,
                    &params,
                    EngineConfig::default().with_block_rows(64),
                    &mut rng,
                    &mut sink,
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_border_edges(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagecalc/border_edges");
    for size in [256, 512, 1024] {
        let image = create_image(size, 1);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| border_edges(vec![black_box(&image)], 3, EngineConfig::default(), None).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_isodata, bench_border_edges);
criterion_main!(benches);

// CPU vs GPU resample benchmarks. The GPU benchmarks time dispatch plus the
// device→host readback (the synchronization point), which is the latency a
// consumer of the output actually sees. GPU entries are skipped with a note
// when no Vulkan device is available.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use voxwarp::gpu::device::GpuDevice;
use voxwarp::gpu::resample::{GpuResamplePipeline, GpuTransform};
use voxwarp::gpu::volume::GpuVolume;
use voxwarp::interp::Interpolation;
use voxwarp::resample::{OutputGrid, ResampleFilter};
use voxwarp::transform::{AffineTransform, Transform};
use voxwarp::volume::Volume;

fn bench_volume(dims: [usize; 3]) -> Volume<f32> {
    let mut vol = Volume::new(dims);
    for z in 0..dims[2] {
        for y in 0..dims[1] {
            for x in 0..dims[0] {
                vol.set(
                    x,
                    y,
                    z,
                    100.0 * (x as f32 * 0.13).sin() * (y as f32 * 0.07).cos() + z as f32,
                );
            }
        }
    }
    vol
}

fn bench_affine() -> AffineTransform {
    let mut t = AffineTransform::new();
    t.set_parameters(&[
        1.03, 0.2, 0.0, -0.21, 1.12, 0.3, 0.0, 0.01, 0.8, -10.0, 5.1, 0.0,
    ])
    .unwrap();
    t
}

fn bench_resample(c: &mut Criterion) {
    let vol = bench_volume([128, 128, 64]);
    let affine = bench_affine();
    let grid = OutputGrid::matching(&vol);

    let gpu = match GpuDevice::new() {
        Ok(g) => Some(g),
        Err(e) => {
            eprintln!("[bench] no GPU, skipping GPU benchmarks: {e}");
            None
        }
    };

    let mut group = c.benchmark_group("resample_128x128x64");
    group.sample_size(20);

    for interp in [
        Interpolation::NearestNeighbor,
        Interpolation::Linear,
        Interpolation::BSpline,
    ] {
        let filter = ResampleFilter::new(&vol, &affine, interp, grid.clone(), -1.0);
        group.bench_with_input(
            BenchmarkId::new("cpu", interp.name()),
            &filter,
            |b, filter| {
                b.iter(|| {
                    let out: Volume<i16> = filter.run();
                    out
                })
            },
        );

        if let Some(gpu) = &gpu {
            let transform = GpuTransform::Affine(&affine);
            let pipeline = match GpuResamplePipeline::new(gpu, &transform, interp) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("[bench] pipeline build failed for {}: {e}", interp.name());
                    continue;
                }
            };
            let input = GpuVolume::upload(gpu, filter.interpolator().sample_volume());
            group.bench_function(BenchmarkId::new("gpu", interp.name()), |b| {
                b.iter(|| {
                    let out = pipeline.run(gpu, &input, &transform, &grid, -1.0);
                    out.sync_to_host(gpu)
                })
            });
        }
    }

    group.finish();
}

fn bench_bspline_prefilter(c: &mut Criterion) {
    let vol = bench_volume([128, 128, 64]);
    c.bench_function("bspline_decompose_128x128x64", |b| {
        b.iter(|| voxwarp::interp::bspline_decompose(&vol))
    });
}

criterion_group!(benches, bench_resample, bench_bspline_prefilter);
criterion_main!(benches);

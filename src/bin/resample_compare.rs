// resample_compare — CPU vs GPU resampling comparison harness.
//
// Resamples one 3-D volume twice, through the CPU reference filter and
// through the GPU pipeline built from the same transform + interpolator
// choices, times both over N runs, and gates on the RMSE between the two
// outputs. Exit code 0 means the GPU path agreed with the CPU reference
// within epsilon; 1 means disagreement or a GPU failure.
//
// The output grid is the input geometry with spacing/origin/size each
// perturbed by a random factor in [0.9, 1.1] per axis, so the comparison
// never degenerates into an identity copy.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use rand::SeedableRng;

use voxwarp::gpu::device::GpuDevice;
use voxwarp::gpu::resample::{GpuResamplePipeline, GpuTransform};
use voxwarp::gpu::volume::GpuVolume;
use voxwarp::interp::Interpolation;
use voxwarp::io::{read_mha, write_mha};
use voxwarp::metrics::{max_abs_diff, rmse};
use voxwarp::resample::{OutputGrid, ResampleFilter};
use voxwarp::transform::{AffineTransform, BSplineTransform, Transform};
use voxwarp::volume::Volume;

/// Default pixel value written outside the input domain.
const DEFAULT_VALUE: f32 = -1.0;

/// Fixed affine used by the harness: anisotropic scale + shear + translation,
/// enough to exercise every matrix entry without folding the volume.
const AFFINE_PARAMS: [f32; 12] = [
    1.03, 0.2, 0.0, -0.21, 1.12, 0.3, 0.0, 0.01, 0.8, -10.0, 5.1, 0.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InterpArg {
    Nearest,
    Linear,
    Bspline,
}

impl From<InterpArg> for Interpolation {
    fn from(a: InterpArg) -> Self {
        match a {
            InterpArg::Nearest => Interpolation::NearestNeighbor,
            InterpArg::Linear => Interpolation::Linear,
            InterpArg::Bspline => Interpolation::BSpline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransformArg {
    Affine,
    Bspline,
}

#[derive(Parser, Debug)]
#[command(
    name = "resample-compare",
    about = "Resample a 3-D volume on CPU and GPU and compare the outputs"
)]
struct Args {
    /// Input volume (.mha, MET_SHORT). A synthetic volume is generated when
    /// omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Where to write the CPU output (.mha).
    #[arg(long)]
    output_cpu: Option<PathBuf>,

    /// Where to write the GPU output (.mha).
    #[arg(long)]
    output_gpu: Option<PathBuf>,

    /// Interpolation kernel.
    #[arg(long, value_enum, default_value_t = InterpArg::Nearest)]
    interpolator: InterpArg,

    /// Transform model.
    #[arg(long, value_enum, default_value_t = TransformArg::Affine)]
    transform: TransformArg,

    /// B-spline displacement file: one value per control-point node,
    /// whitespace-separated, applied to all three components. Required for
    /// the B-spline transform, ignored for the affine transform.
    #[arg(long, required_if_eq("transform", "bspline"))]
    parameters: Option<PathBuf>,

    /// Timed runs per pipeline (at least 1).
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    runs: u64,

    /// RMSE pass threshold.
    #[arg(long, default_value_t = 0.03)]
    epsilon: f64,

    /// Seed for the output-grid jitter (defaults to a random grid).
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("[voxwarp] error: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<bool, Box<dyn std::error::Error>> {
    // GPU first: if there is no usable device there is nothing to compare.
    let gpu = GpuDevice::new()?;
    eprintln!("[voxwarp] using {}", gpu.adapter_info);

    let input_i16 = match &args.input {
        Some(path) => {
            eprintln!("[voxwarp] reading {}", path.display());
            read_mha(path)?
        }
        None => {
            eprintln!("[voxwarp] no input given, generating a synthetic volume");
            synthetic_volume()
        }
    };
    let [nx, ny, nz] = input_i16.dims();
    eprintln!("[voxwarp] input {nx}×{ny}×{nz}, spacing {:?}", input_i16.spacing());

    let input = input_i16.to_f32();
    let interpolation: Interpolation = args.interpolator.into();

    let mut rng = match args.seed {
        Some(s) => rand::rngs::StdRng::seed_from_u64(s),
        None => rand::rngs::StdRng::from_entropy(),
    };
    let grid = OutputGrid::jittered_from(&input, &mut rng);
    eprintln!(
        "[voxwarp] output grid {:?}, spacing {:?}",
        grid.size, grid.spacing
    );

    // Both pipelines evaluate the exact same transform object.
    let affine;
    let bspline;
    let (transform, gpu_transform): (&dyn Transform, GpuTransform<'_>) = match args.transform {
        TransformArg::Affine => {
            let mut t = AffineTransform::new();
            t.set_parameters(&AFFINE_PARAMS)?;
            affine = t;
            (&affine, GpuTransform::Affine(&affine))
        }
        TransformArg::Bspline => {
            let mut t = harness_bspline(&input);
            // clap enforces the flag; the error arm guards against callers
            // constructing Args by hand.
            let params = match &args.parameters {
                Some(path) => read_node_displacements(path, t.num_nodes())?,
                None => return Err("--parameters is required for the B-spline transform".into()),
            };
            t.set_parameters(&params)?;
            bspline = t;
            (&bspline, GpuTransform::BSpline(&bspline))
        }
    };

    // --- CPU ---------------------------------------------------------------
    // Filter construction (including the B-spline prefilter) sits outside the
    // timing loop on both paths.
    let filter = ResampleFilter::new(&input, transform, interpolation, grid.clone(), DEFAULT_VALUE);
    let threads = rayon::current_num_threads();

    // Warm-up run spins up the rayon pool before the clock starts.
    let _: Volume<i16> = filter.run();
    let start = Instant::now();
    for _ in 1..args.runs {
        let _: Volume<i16> = filter.run();
    }
    let cpu_out: Volume<i16> = filter.run();
    let cpu_ms = start.elapsed().as_secs_f64() * 1000.0 / args.runs as f64;

    if let Some(path) = &args.output_cpu {
        write_mha(path, &cpu_out)?;
        eprintln!("[voxwarp] wrote {}", path.display());
    }

    // --- GPU ---------------------------------------------------------------
    let pipeline = GpuResamplePipeline::new(&gpu, &gpu_transform, interpolation)?;
    let gpu_input = GpuVolume::upload(&gpu, filter.interpolator().sample_volume());

    // Warm-up: first dispatch includes driver pipeline work.
    let warmup = pipeline.run(&gpu, &gpu_input, &gpu_transform, &grid, DEFAULT_VALUE);
    warmup.sync_to_host(&gpu);

    // Explicit device→host sync every iteration, so the measured time is
    // what a consumer of the result would actually wait.
    let start = Instant::now();
    for _ in 1..args.runs {
        let out = pipeline.run(&gpu, &gpu_input, &gpu_transform, &grid, DEFAULT_VALUE);
        out.sync_to_host(&gpu);
    }
    let out = pipeline.run(&gpu, &gpu_input, &gpu_transform, &grid, DEFAULT_VALUE);
    out.sync_to_host(&gpu);
    let gpu_ms = start.elapsed().as_secs_f64() * 1000.0 / args.runs as f64;
    let gpu_out: Volume<i16> = out.to_volume(&gpu);

    if let Some(path) = &args.output_gpu {
        write_mha(path, &gpu_out)?;
        eprintln!("[voxwarp] wrote {}", path.display());
    }

    // --- Report ------------------------------------------------------------
    let err = rmse(&cpu_out, &gpu_out);
    let max_err = max_abs_diff(&cpu_out, &gpu_out);

    println!(
        "CPU {} {} {} threads {:.3} ms/run over {} runs",
        transform.name(),
        interpolation.name(),
        threads,
        cpu_ms,
        args.runs
    );
    println!(
        "GPU {} {} {} {:.3} ms/run over {} runs (speedup {:.2}x)",
        transform.name(),
        interpolation.name(),
        gpu.adapter_info.name,
        gpu_ms,
        args.runs,
        cpu_ms / gpu_ms
    );
    println!("RMSE {err:.6} (max |diff| {max_err:.3}, epsilon {})", args.epsilon);

    if err > args.epsilon {
        eprintln!("[voxwarp] FAIL: rmse {err:.6} exceeds epsilon {}", args.epsilon);
        Ok(false)
    } else {
        println!("PASS");
        Ok(true)
    }
}

/// Deterministic synthetic CT-like volume: a smooth intensity field with an
/// embedded bright ellipsoid, so every interpolator has structure to chew on.
fn synthetic_volume() -> Volume<i16> {
    let dims = [64, 64, 32];
    let mut vol = Volume::new(dims);
    vol.set_spacing([1.1, 0.9, 2.0]);
    vol.set_origin([-32.0, -28.0, -30.0]);
    for z in 0..dims[2] {
        for y in 0..dims[1] {
            for x in 0..dims[0] {
                let fx = x as f32 / dims[0] as f32 - 0.5;
                let fy = y as f32 / dims[1] as f32 - 0.5;
                let fz = z as f32 / dims[2] as f32 - 0.5;
                let r2 = fx * fx + fy * fy + fz * fz;
                let mut v = 200.0 * (fx * 6.0).sin() * (fy * 5.0).cos() + 40.0 * fz;
                if r2 < 0.09 {
                    v += 600.0 * (1.0 - r2 / 0.09);
                }
                vol.set(x, y, z, v as i16);
            }
        }
    }
    vol
}

/// The harness's FFD: domain covering the input volume's physical extent,
/// 4 spline cells per axis.
fn harness_bspline(input: &Volume<f32>) -> BSplineTransform {
    let dims = input.dims();
    let spacing = input.spacing();
    let physical = [
        (dims[0].max(2) - 1) as f32 * spacing[0],
        (dims[1].max(2) - 1) as f32 * spacing[1],
        (dims[2].max(2) - 1) as f32 * spacing[2],
    ];
    BSplineTransform::new(input.origin(), input.direction(), physical, [4, 4, 4])
}

/// Read node displacements from a parameters file: one value per grid node,
/// whitespace-separated, replicated to all three displacement components.
fn read_node_displacements(
    path: &std::path::Path,
    num_nodes: usize,
) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let mut nodes = Vec::with_capacity(num_nodes);
    for tok in text.split_whitespace() {
        nodes.push(tok.parse::<f32>().map_err(|_| {
            format!("bad value {tok:?} in {}", path.display())
        })?);
    }
    if nodes.len() != num_nodes {
        return Err(format!(
            "{} holds {} node values, transform expects {num_nodes}",
            path.display(),
            nodes.len()
        )
        .into());
    }
    let mut params = Vec::with_capacity(3 * num_nodes);
    for _ in 0..3 {
        params.extend_from_slice(&nodes);
    }
    Ok(params)
}

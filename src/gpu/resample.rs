// gpu/resample.rs — The resample compute pipeline.
//
// One pipeline per (transform, interpolator) combination: the WGSL source is
// specialized by token substitution at creation time, so the kernel carries
// no runtime branching on mode. Everything that varies per run (geometry,
// affine rows, control-point displacements, default value) travels in a
// uniform buffer plus a control-grid storage buffer.
//
// The pipeline never reads host volumes directly: callers upload via
// `GpuVolume::upload` — for the B-spline interpolator, upload the *prefiltered
// coefficient volume* (`Interpolator::sample_volume`), not the raw samples.

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::volume::GpuVolume;
use crate::interp::Interpolation;
use crate::resample::OutputGrid;
use crate::transform::{AffineTransform, BSplineTransform, Transform};
use crate::volume::{mat3_inverse, IDENTITY};

const SHADER_SRC: &str = include_str!("../shaders/resample.wgsl");

/// Transform selection for the GPU pipeline.
///
/// Borrows the host transform: parameters live on the host and are packed
/// into GPU buffers at `run()` time, so mutating the host transform between
/// runs takes effect without rebuilding the pipeline.
pub enum GpuTransform<'a> {
    Affine(&'a AffineTransform),
    BSpline(&'a BSplineTransform),
}

impl GpuTransform<'_> {
    fn mode(&self) -> u32 {
        match self {
            GpuTransform::Affine(_) => 0,
            GpuTransform::BSpline(_) => 1,
        }
    }

    /// Type name for the harness report line.
    pub fn name(&self) -> &'static str {
        match self {
            GpuTransform::Affine(t) => t.name(),
            GpuTransform::BSpline(t) => t.name(),
        }
    }
}

/// Uniform block for the resample kernel. Layout must match `struct Params`
/// in resample.wgsl: 22 vec4 fields, 352 bytes, no padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ResampleParams {
    in_dims: [u32; 4],
    out_dims: [u32; 4],
    grid_dims: [u32; 4],
    in_origin: [f32; 4],
    in_spacing: [f32; 4],
    in_dir_inv0: [f32; 4],
    in_dir_inv1: [f32; 4],
    in_dir_inv2: [f32; 4],
    out_origin: [f32; 4],
    out_spacing: [f32; 4],
    out_dir0: [f32; 4],
    out_dir1: [f32; 4],
    out_dir2: [f32; 4],
    affine0: [f32; 4],
    affine1: [f32; 4],
    affine2: [f32; 4],
    grid_origin: [f32; 4],
    grid_spacing: [f32; 4],
    grid_dir_inv0: [f32; 4],
    grid_dir_inv1: [f32; 4],
    grid_dir_inv2: [f32; 4],
    default_value: [f32; 4],
}

fn vec4(v: [f32; 3]) -> [f32; 4] {
    [v[0], v[1], v[2], 0.0]
}

fn row4(m: &[[f32; 3]; 3], r: usize, w: f32) -> [f32; 4] {
    [m[r][0], m[r][1], m[r][2], w]
}

/// Substitute the specialization tokens into the WGSL source.
fn specialize_source(
    src: &str,
    wg: (u32, u32, u32),
    transform_mode: u32,
    interp_mode: u32,
) -> String {
    src.replace("{{WG_X}}", &wg.0.to_string())
        .replace("{{WG_Y}}", &wg.1.to_string())
        .replace("{{WG_Z}}", &wg.2.to_string())
        .replace("{{TRANSFORM_MODE}}", &transform_mode.to_string())
        .replace("{{INTERP_MODE}}", &interp_mode.to_string())
}

/// A compiled resample pipeline, specialized for one transform mode and one
/// interpolation kernel.
pub struct GpuResamplePipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    transform_mode: u32,
    interpolation: Interpolation,
}

impl GpuResamplePipeline {
    /// Compile the kernel for the given transform/interpolator combination.
    ///
    /// Shader compilation errors are surfaced as [`GpuError::ShaderCompile`]
    /// rather than wgpu's default panic, so the harness can report a broken
    /// GPU path and still finish the CPU side.
    pub fn new(
        gpu: &GpuDevice,
        transform: &GpuTransform<'_>,
        interpolation: Interpolation,
    ) -> Result<Self, GpuError> {
        let interp_mode = match interpolation {
            Interpolation::NearestNeighbor => 0,
            Interpolation::Linear => 1,
            Interpolation::BSpline => 2,
        };
        let ws = gpu.workgroup_size;
        let src = specialize_source(
            SHADER_SRC,
            (ws.x, ws.y, ws.z),
            transform.mode(),
            interp_mode,
        );

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("resample-shader"),
                source: wgpu::ShaderSource::Wgsl(src.into()),
            });

        let bind_group_layout =
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("resample-bind-group-layout"),
                    entries: &[
                        buffer_entry(0, wgpu::BufferBindingType::Uniform),
                        buffer_entry(
                            1,
                            wgpu::BufferBindingType::Storage { read_only: true },
                        ),
                        buffer_entry(
                            2,
                            wgpu::BufferBindingType::Storage { read_only: false },
                        ),
                        buffer_entry(
                            3,
                            wgpu::BufferBindingType::Storage { read_only: true },
                        ),
                    ],
                });

        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("resample-pipeline-layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("resample-pipeline"),
                layout: Some(&layout),
                module: &module,
                entry_point: "resample",
                compilation_options: Default::default(),
                cache: None,
            });

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(GpuError::ShaderCompile(err.to_string()));
        }

        Ok(GpuResamplePipeline {
            pipeline,
            bind_group_layout,
            transform_mode: transform.mode(),
            interpolation,
        })
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// Dispatch the kernel: resample `input` onto `grid` under `transform`.
    ///
    /// Returns the output still on the device; call
    /// [`GpuVolume::sync_to_host`] or [`GpuVolume::to_volume`] to read it
    /// back (that is the synchronization point).
    ///
    /// # Panics
    /// Panics if the transform variant does not match the mode the pipeline
    /// was specialized for, or if the input direction matrix is singular
    /// (the same condition the CPU filter rejects).
    pub fn run(
        &self,
        gpu: &GpuDevice,
        input: &GpuVolume,
        transform: &GpuTransform<'_>,
        grid: &OutputGrid,
        default_value: f32,
    ) -> GpuVolume {
        assert_eq!(
            transform.mode(),
            self.transform_mode,
            "pipeline was specialized for a different transform mode"
        );

        let in_dir_inv = match mat3_inverse(&input.direction) {
            Some(m) => m,
            None => panic!("singular input direction: {:?}", input.direction),
        };

        let mut params = ResampleParams {
            in_dims: [input.dims[0], input.dims[1], input.dims[2], 0],
            out_dims: [
                grid.size[0] as u32,
                grid.size[1] as u32,
                grid.size[2] as u32,
                0,
            ],
            grid_dims: [1, 1, 1, 0],
            in_origin: vec4(input.origin),
            in_spacing: vec4(input.spacing),
            in_dir_inv0: row4(&in_dir_inv, 0, 0.0),
            in_dir_inv1: row4(&in_dir_inv, 1, 0.0),
            in_dir_inv2: row4(&in_dir_inv, 2, 0.0),
            out_origin: vec4(grid.origin),
            out_spacing: vec4(grid.spacing),
            out_dir0: row4(&grid.direction, 0, 0.0),
            out_dir1: row4(&grid.direction, 1, 0.0),
            out_dir2: row4(&grid.direction, 2, 0.0),
            affine0: row4(&IDENTITY, 0, 0.0),
            affine1: row4(&IDENTITY, 1, 0.0),
            affine2: row4(&IDENTITY, 2, 0.0),
            grid_origin: [0.0; 4],
            grid_spacing: [1.0, 1.0, 1.0, 0.0],
            grid_dir_inv0: row4(&IDENTITY, 0, 0.0),
            grid_dir_inv1: row4(&IDENTITY, 1, 0.0),
            grid_dir_inv2: row4(&IDENTITY, 2, 0.0),
            default_value: [default_value, 0.0, 0.0, 0.0],
        };

        let control_data: &[f32] = match transform {
            GpuTransform::Affine(t) => {
                params.affine0 = row4(&t.matrix, 0, t.translation[0]);
                params.affine1 = row4(&t.matrix, 1, t.translation[1]);
                params.affine2 = row4(&t.matrix, 2, t.translation[2]);
                // Unused binding still needs a non-empty buffer.
                &[0.0]
            }
            GpuTransform::BSpline(t) => {
                let gd = t.grid_dims();
                params.grid_dims = [gd[0] as u32, gd[1] as u32, gd[2] as u32, 0];
                params.grid_origin = vec4(t.domain_origin());
                params.grid_spacing = vec4(t.grid_spacing());
                let gi = t.domain_dir_inv();
                params.grid_dir_inv0 = row4(&gi, 0, 0.0);
                params.grid_dir_inv1 = row4(&gi, 1, 0.0);
                params.grid_dir_inv2 = row4(&gi, 2, 0.0);
                t.coefficients()
            }
        };

        let uniform = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("resample-params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let control_buffer =
            gpu.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("resample-control-grid"),
                    contents: bytemuck::cast_slice(control_data),
                    usage: wgpu::BufferUsages::STORAGE,
                });

        let output = GpuVolume::new_output(gpu, grid);

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("resample-bind-group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: control_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("resample-encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("resample-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (dx, dy, dz) = gpu.dispatch_size(grid.size);
            pass.dispatch_workgroups(dx, dy, dz);
        }
        gpu.queue.submit(Some(encoder.finish()));

        output
    }
}

fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

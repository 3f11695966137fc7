// resample.rs — CPU reference resample filter.
//
// The core operation of the whole crate. For every output voxel:
//
//   1. output index → physical point (output grid geometry)
//   2. physical point → transformed point (affine or B-spline FFD)
//   3. transformed point → continuous input index (input geometry)
//   4. inside the input? interpolate : default value
//
// The GPU kernel in gpu/resample.rs runs the same four steps one thread per
// voxel; this implementation is the reference it is validated against, so
// all arithmetic is f32 — matching the shader, not maximizing CPU precision.
//
// Parallelism: output z-slabs are distributed over rayon workers. Slabs are
// disjoint `&mut` chunks of the output buffer, so no synchronization is
// needed; the transform and interpolator are shared immutably.

use rayon::prelude::*;

use crate::interp::{Interpolation, Interpolator};
use crate::transform::Transform;
use crate::volume::{mat3_mul_vec, Volume, Voxel};

// ---------------------------------------------------------------------------
// OutputGrid
// ---------------------------------------------------------------------------

/// Geometry of the resampled output: where its voxels sit in physical space.
#[derive(Debug, Clone)]
pub struct OutputGrid {
    pub size: [usize; 3],
    pub spacing: [f32; 3],
    pub origin: [f32; 3],
    pub direction: [[f32; 3]; 3],
}

impl OutputGrid {
    /// A grid identical to the input volume's own geometry.
    pub fn matching<T: Voxel>(vol: &Volume<T>) -> Self {
        OutputGrid {
            size: vol.dims(),
            spacing: vol.spacing(),
            origin: vol.origin(),
            direction: vol.direction(),
        }
    }

    /// The comparison harness's grid: the input geometry with spacing,
    /// origin and size each perturbed by an independent uniform factor in
    /// [0.9, 1.1] per axis. Direction is copied unchanged.
    pub fn jittered_from<T: Voxel, R: rand::Rng>(vol: &Volume<T>, rng: &mut R) -> Self {
        let mut grid = Self::matching(vol);
        for d in 0..3 {
            grid.spacing[d] *= rng.gen_range(0.9..1.1);
            grid.origin[d] *= rng.gen_range(0.9..1.1);
            let scaled = vol.dims()[d] as f32 * rng.gen_range(0.9..1.1);
            grid.size[d] = (scaled.round() as usize).max(1);
        }
        grid
    }

    /// Physical point of an output voxel index.
    #[inline]
    pub fn index_to_point(&self, idx: [f32; 3]) -> [f32; 3] {
        let scaled = [
            idx[0] * self.spacing[0],
            idx[1] * self.spacing[1],
            idx[2] * self.spacing[2],
        ];
        let rotated = mat3_mul_vec(&self.direction, scaled);
        [
            self.origin[0] + rotated[0],
            self.origin[1] + rotated[1],
            self.origin[2] + rotated[2],
        ]
    }

    /// Total number of output voxels.
    pub fn num_voxels(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }
}

// ---------------------------------------------------------------------------
// ResampleFilter
// ---------------------------------------------------------------------------

/// CPU resample filter: input volume + transform + interpolator + output grid.
///
/// The input is `Volume<f32>` — integer inputs are converted once up front
/// (interpolation runs in f32 regardless), which also lets the B-spline
/// prefilter run once instead of per `run()` call: construct the filter
/// outside the timing loop, call [`ResampleFilter::run`] inside it.
pub struct ResampleFilter<'a> {
    input: &'a Volume<f32>,
    transform: &'a dyn Transform,
    interpolator: Interpolator<'a>,
    grid: OutputGrid,
    default_value: f32,
}

impl<'a> ResampleFilter<'a> {
    pub fn new(
        input: &'a Volume<f32>,
        transform: &'a dyn Transform,
        interpolation: Interpolation,
        grid: OutputGrid,
        default_value: f32,
    ) -> Self {
        ResampleFilter {
            input,
            transform,
            interpolator: Interpolator::new(input, interpolation),
            grid,
            default_value,
        }
    }

    pub fn grid(&self) -> &OutputGrid {
        &self.grid
    }

    /// The prepared interpolator (the GPU path uploads its sample volume).
    pub fn interpolator(&self) -> &Interpolator<'a> {
        &self.interpolator
    }

    /// Resample the input onto the output grid.
    pub fn run<T: Voxel>(&self) -> Volume<T> {
        let [nx, ny, _nz] = self.grid.size;
        let in_dims = self.input.dims();
        let dir_inv = self.input.direction_inverse();

        let mut out = Volume::<T>::with_geometry(
            self.grid.size,
            self.grid.spacing,
            self.grid.origin,
            self.grid.direction,
        );

        let grid = &self.grid;
        let input = self.input;
        let transform = self.transform;
        let interp = &self.interpolator;
        let default_value = self.default_value;

        out.as_mut_slice()
            .par_chunks_mut(nx * ny)
            .enumerate()
            .for_each(|(z, slab)| {
                for y in 0..ny {
                    for x in 0..nx {
                        let p_out = grid.index_to_point([x as f32, y as f32, z as f32]);
                        let p_in = transform.transform_point(p_out);
                        let c = input.point_to_index(p_in, &dir_inv);
                        let v = if is_inside(c, in_dims) {
                            interp.sample(c)
                        } else {
                            default_value
                        };
                        slab[y * nx + x] = T::from_f32(v);
                    }
                }
            });

        out
    }
}

/// Inside test shared (by construction) with the WGSL kernel: every component
/// of the continuous index within `[0, n−1]`.
#[inline]
fn is_inside(c: [f32; 3], dims: [usize; 3]) -> bool {
    (0..3).all(|d| c[d] >= 0.0 && c[d] <= (dims[d] - 1) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::AffineTransform;

    fn ramp_volume(dims: [usize; 3]) -> Volume<f32> {
        let mut vol = Volume::new(dims);
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    vol.set(x, y, z, (x + 10 * y + 100 * z) as f32);
                }
            }
        }
        vol
    }

    #[test]
    fn test_identity_resample_reproduces_input() {
        let vol = ramp_volume([6, 5, 4]);
        let t = AffineTransform::new();
        let filter = ResampleFilter::new(
            &vol,
            &t,
            Interpolation::NearestNeighbor,
            OutputGrid::matching(&vol),
            -1.0,
        );
        let out: Volume<f32> = filter.run();
        assert_eq!(out.dims(), vol.dims());
        assert_eq!(out.as_slice(), vol.as_slice());
    }

    #[test]
    fn test_identity_resample_linear_matches_nearest() {
        // On an exact grid the trilinear weights are all 0/1 — linear and
        // nearest must agree exactly.
        let vol = ramp_volume([5, 5, 5]);
        let t = AffineTransform::new();
        let grid = OutputGrid::matching(&vol);
        let nn: Volume<f32> =
            ResampleFilter::new(&vol, &t, Interpolation::NearestNeighbor, grid.clone(), -1.0)
                .run();
        let lin: Volume<f32> =
            ResampleFilter::new(&vol, &t, Interpolation::Linear, grid, -1.0).run();
        for (a, b) in nn.as_slice().iter().zip(lin.as_slice()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_integer_translation_shifts_voxels() {
        // Transform maps output point p to input point p + 1 on x: output
        // voxel x samples input voxel x+1.
        let vol = ramp_volume([6, 4, 3]);
        let mut t = AffineTransform::new();
        t.translation = [1.0, 0.0, 0.0];
        let filter = ResampleFilter::new(
            &vol,
            &t,
            Interpolation::Linear,
            OutputGrid::matching(&vol),
            -1.0,
        );
        let out: Volume<f32> = filter.run();
        for z in 0..3 {
            for y in 0..4 {
                for x in 0..5 {
                    assert_eq!(out.get(x, y, z), vol.get(x + 1, y, z), "({x},{y},{z})");
                }
                // x = 5 maps to input x = 6 — outside, default value.
                assert_eq!(out.get(5, y, z), -1.0);
            }
        }
    }

    #[test]
    fn test_default_value_outside_input() {
        let vol = ramp_volume([4, 4, 4]);
        let mut t = AffineTransform::new();
        t.translation = [100.0, 0.0, 0.0]; // everything lands outside
        let filter = ResampleFilter::new(
            &vol,
            &t,
            Interpolation::Linear,
            OutputGrid::matching(&vol),
            -7.0,
        );
        let out: Volume<f32> = filter.run();
        assert!(out.as_slice().iter().all(|&v| v == -7.0));
    }

    #[test]
    fn test_output_carries_grid_geometry() {
        let vol = ramp_volume([4, 4, 4]);
        let t = AffineTransform::new();
        let grid = OutputGrid {
            size: [3, 5, 2],
            spacing: [2.0, 0.5, 1.0],
            origin: [1.0, -2.0, 3.0],
            direction: crate::volume::IDENTITY,
        };
        let filter = ResampleFilter::new(&vol, &t, Interpolation::Linear, grid, 0.0);
        let out: Volume<i16> = filter.run();
        assert_eq!(out.dims(), [3, 5, 2]);
        assert_eq!(out.spacing(), [2.0, 0.5, 1.0]);
        assert_eq!(out.origin(), [1.0, -2.0, 3.0]);
    }

    #[test]
    fn test_half_voxel_shift_linear_averages() {
        // Shift by half a voxel along x: each output voxel is the mean of
        // two x-neighbors.
        let vol = ramp_volume([6, 3, 3]);
        let mut t = AffineTransform::new();
        t.translation = [0.5, 0.0, 0.0];
        let filter = ResampleFilter::new(
            &vol,
            &t,
            Interpolation::Linear,
            OutputGrid::matching(&vol),
            -1.0,
        );
        let out: Volume<f32> = filter.run();
        let expected = (vol.get(2, 1, 1) + vol.get(3, 1, 1)) / 2.0;
        assert!((out.get(2, 1, 1) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_anisotropic_spacing_resample() {
        // Output grid with half the x spacing: 2× upsampling along x. Linear
        // interpolation of the x-ramp must land midway between neighbors.
        let vol = ramp_volume([4, 3, 3]);
        let mut grid = OutputGrid::matching(&vol);
        grid.spacing = [0.5, 1.0, 1.0];
        grid.size = [7, 3, 3];
        let t = AffineTransform::new();
        let filter = ResampleFilter::new(&vol, &t, Interpolation::Linear, grid, -1.0);
        let out: Volume<f32> = filter.run();
        assert_eq!(out.get(0, 0, 0), 0.0);
        assert!((out.get(1, 0, 0) - 0.5).abs() < 1e-4);
        assert!((out.get(2, 0, 0) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_jittered_grid_bounds() {
        let vol: Volume<i16> = Volume::new([50, 40, 30]);
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(7);
        for _ in 0..20 {
            let grid = OutputGrid::jittered_from(&vol, &mut rng);
            for d in 0..3 {
                let n = vol.dims()[d] as f32;
                assert!(grid.size[d] as f32 >= (n * 0.9).round() - 1.0);
                assert!(grid.size[d] as f32 <= (n * 1.1).round() + 1.0);
                assert!(grid.spacing[d] > 0.0);
            }
        }
    }
}

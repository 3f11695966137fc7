// interp.rs — Interpolation kernels over continuous volume indices.
//
// Three kernels, selected by the harness:
//
//   NearestNeighbor — round half up per axis, then a direct load.
//   Linear          — trilinear blend of the 8 surrounding voxels.
//   BSpline         — cubic (order 3) B-spline over a *coefficient* volume.
//
// The cubic spline does not interpolate raw samples directly: the input must
// first be converted to B-spline coefficients so the spline passes through
// the original samples. That prefilter (`bspline_decompose`) is Unser's
// recursive algorithm — one causal + one anticausal IIR pass per axis with
// pole z = √3 − 2 and gain 6, mirror boundaries.
//
// All sampling is f32 and the WGSL resample kernel reproduces it operation
// for operation; the prefilter runs in f64 internally (it is a host-side,
// once-per-volume step and the recursion is sensitive to accumulation error).
//
// Callers guarantee the continuous index is inside the volume
// (every component in [0, n−1]); the resample filter substitutes the default
// value before ever calling `sample`.

use crate::volume::Volume;

/// Spline order for the B-spline kernel. Only the cubic spline is
/// implemented; the order is fixed rather than parameterized.
pub const SPLINE_ORDER: usize = 3;

/// Pole of the cubic B-spline decomposition filter: √3 − 2.
const POLE: f64 = -0.267_949_192_431_122_7;

/// Interpolation kernel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    NearestNeighbor,
    Linear,
    BSpline,
}

impl Interpolation {
    /// Type name for the harness report line.
    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::NearestNeighbor => "NearestNeighborInterpolator",
            Interpolation::Linear => "LinearInterpolator",
            Interpolation::BSpline => "BSplineInterpolator",
        }
    }
}

// ---------------------------------------------------------------------------
// Cubic B-spline basis
// ---------------------------------------------------------------------------

/// The four cubic B-spline weights for a fractional offset `t ∈ [0, 1]`.
///
/// `w[j]` weights the node at `floor(x) − 1 + j`. The weights sum to 1 for
/// any `t` (partition of unity). Shared by the B-spline interpolator and the
/// FFD transform — both evaluate the same basis.
#[inline]
pub fn cubic_bspline_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    let one_minus = 1.0 - t;
    [
        one_minus * one_minus * one_minus / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

/// Reflect an index into `[0, n−1]` with whole-sample symmetry (period
/// `2n − 2`). Matches the mirror boundary used by the decomposition filter,
/// so coefficient lookups just outside the volume stay consistent with it.
#[inline]
pub fn mirror_index(i: i64, n: i64) -> usize {
    debug_assert!(n > 0);
    if n == 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let mut k = i.rem_euclid(period);
    if k >= n {
        k = period - k;
    }
    k as usize
}

// ---------------------------------------------------------------------------
// B-spline decomposition (prefilter)
// ---------------------------------------------------------------------------

/// Convert a sample volume into cubic B-spline coefficients.
///
/// Applies the 1-D recursive filter along x, then y, then z. After this, the
/// cubic spline evaluated at integer indices reproduces the original samples
/// (to float tolerance).
pub fn bspline_decompose(vol: &Volume<f32>) -> Volume<f32> {
    let mut out = vol.clone();
    let [nx, ny, nz] = vol.dims();
    let data = out.as_mut_slice();

    let mut line: Vec<f64> = Vec::new();

    // Axis 0: lines are contiguous.
    line.resize(nx, 0.0);
    for z in 0..nz {
        for y in 0..ny {
            let start = (z * ny + y) * nx;
            for (i, l) in line.iter_mut().enumerate() {
                *l = data[start + i] as f64;
            }
            filter_line(&mut line);
            for (i, l) in line.iter().enumerate() {
                data[start + i] = *l as f32;
            }
        }
    }

    // Axis 1: stride nx.
    line.resize(ny, 0.0);
    for z in 0..nz {
        for x in 0..nx {
            let start = z * ny * nx + x;
            for (j, l) in line.iter_mut().enumerate() {
                *l = data[start + j * nx] as f64;
            }
            filter_line(&mut line);
            for (j, l) in line.iter().enumerate() {
                data[start + j * nx] = *l as f32;
            }
        }
    }

    // Axis 2: stride nx*ny.
    line.resize(nz, 0.0);
    let slab = nx * ny;
    for y in 0..ny {
        for x in 0..nx {
            let start = y * nx + x;
            for (k, l) in line.iter_mut().enumerate() {
                *l = data[start + k * slab] as f64;
            }
            filter_line(&mut line);
            for (k, l) in line.iter().enumerate() {
                data[start + k * slab] = *l as f32;
            }
        }
    }

    out
}

/// In-place 1-D coefficient filter: gain, causal pass, anticausal pass.
fn filter_line(c: &mut [f64]) {
    let n = c.len();
    if n == 1 {
        // A single sample is its own coefficient.
        return;
    }

    // Overall gain for the single cubic pole: (1 − z)(1 − 1/z) = 6.
    let gain = (1.0 - POLE) * (1.0 - 1.0 / POLE);
    for v in c.iter_mut() {
        *v *= gain;
    }

    // Causal recursion.
    c[0] = initial_causal(c);
    for k in 1..n {
        c[k] += POLE * c[k - 1];
    }

    // Anticausal recursion.
    c[n - 1] = (POLE / (POLE * POLE - 1.0)) * (POLE * c[n - 2] + c[n - 1]);
    for k in (0..n - 1).rev() {
        c[k] = POLE * (c[k + 1] - c[k]);
    }
}

/// Initial coefficient of the causal pass under mirror boundaries.
///
/// For long lines the geometric series is truncated at a horizon where the
/// pole's magnitude has decayed below 1e-10 (~18 taps for the cubic pole);
/// short lines use the exact closed form over the mirrored signal.
fn initial_causal(c: &[f64]) -> f64 {
    let n = c.len();
    let horizon = (1e-10f64.ln() / POLE.abs().ln()).ceil() as usize;

    if horizon < n {
        let mut zk = POLE;
        let mut sum = c[0];
        for &v in c.iter().take(horizon).skip(1) {
            sum += zk * v;
            zk *= POLE;
        }
        sum
    } else {
        let iz = 1.0 / POLE;
        let z_n1 = POLE.powi(n as i32 - 1);
        let mut sum = c[0] + z_n1 * c[n - 1];
        let mut zk = POLE;
        let mut z2k = z_n1 * z_n1 * iz;
        for &v in c.iter().take(n - 1).skip(1) {
            sum += (zk + z2k) * v;
            zk *= POLE;
            z2k *= iz;
        }
        sum / (1.0 - z_n1 * z_n1)
    }
}

// ---------------------------------------------------------------------------
// Interpolator
// ---------------------------------------------------------------------------

/// An interpolation kernel bound to an input volume.
///
/// Construction runs the decomposition prefilter when the B-spline kernel is
/// selected; `sample()` is then cheap and thread-safe (`&self` only), which
/// is what the rayon resample loop needs.
pub struct Interpolator<'a> {
    mode: Interpolation,
    vol: &'a Volume<f32>,
    /// Coefficient volume for the B-spline kernel; `None` otherwise.
    coeffs: Option<Volume<f32>>,
}

impl<'a> Interpolator<'a> {
    pub fn new(vol: &'a Volume<f32>, mode: Interpolation) -> Self {
        let coeffs = match mode {
            Interpolation::BSpline => Some(bspline_decompose(vol)),
            _ => None,
        };
        Interpolator { mode, vol, coeffs }
    }

    pub fn mode(&self) -> Interpolation {
        self.mode
    }

    /// The volume the GPU kernel should sample: the coefficient volume for
    /// the B-spline kernel, the raw samples otherwise.
    pub fn sample_volume(&self) -> &Volume<f32> {
        self.coeffs.as_ref().unwrap_or(self.vol)
    }

    /// Sample at a continuous index. Caller guarantees every component is in
    /// `[0, n−1]`.
    #[inline]
    pub fn sample(&self, c: [f32; 3]) -> f32 {
        match self.mode {
            Interpolation::NearestNeighbor => sample_nearest(self.vol, c),
            Interpolation::Linear => sample_linear(self.vol, c),
            Interpolation::BSpline => {
                // coeffs is always Some for BSpline (set in new()).
                sample_bspline(self.coeffs.as_ref().unwrap(), c)
            }
        }
    }
}

#[inline]
fn sample_nearest(vol: &Volume<f32>, c: [f32; 3]) -> f32 {
    let [nx, ny, nz] = vol.dims();
    // Round half up per axis.
    let x = ((c[0] + 0.5).floor() as usize).min(nx - 1);
    let y = ((c[1] + 0.5).floor() as usize).min(ny - 1);
    let z = ((c[2] + 0.5).floor() as usize).min(nz - 1);
    // SAFETY: indices clamped to bounds above.
    unsafe { vol.get_unchecked(x, y, z) }
}

#[inline]
fn sample_linear(vol: &Volume<f32>, c: [f32; 3]) -> f32 {
    let [nx, ny, nz] = vol.dims();

    let x0 = c[0].floor() as usize;
    let y0 = c[1].floor() as usize;
    let z0 = c[2].floor() as usize;
    let tx = c[0] - x0 as f32;
    let ty = c[1] - y0 as f32;
    let tz = c[2] - z0 as f32;

    // At the far face (c == n−1) the +1 neighbor collapses onto the face
    // voxel; its blend weight is 0 there so the value is exact.
    let x1 = (x0 + 1).min(nx - 1);
    let y1 = (y0 + 1).min(ny - 1);
    let z1 = (z0 + 1).min(nz - 1);

    // SAFETY: all indices are within bounds after the clamps above.
    unsafe {
        let c000 = vol.get_unchecked(x0, y0, z0);
        let c100 = vol.get_unchecked(x1, y0, z0);
        let c010 = vol.get_unchecked(x0, y1, z0);
        let c110 = vol.get_unchecked(x1, y1, z0);
        let c001 = vol.get_unchecked(x0, y0, z1);
        let c101 = vol.get_unchecked(x1, y0, z1);
        let c011 = vol.get_unchecked(x0, y1, z1);
        let c111 = vol.get_unchecked(x1, y1, z1);

        let c00 = c000 + tx * (c100 - c000);
        let c10 = c010 + tx * (c110 - c010);
        let c01 = c001 + tx * (c101 - c001);
        let c11 = c011 + tx * (c111 - c011);
        let c0 = c00 + ty * (c10 - c00);
        let c1 = c01 + ty * (c11 - c01);
        c0 + tz * (c1 - c0)
    }
}

#[inline]
fn sample_bspline(coeffs: &Volume<f32>, c: [f32; 3]) -> f32 {
    let dims = coeffs.dims();

    let mut base = [0i64; 3];
    let mut w = [[0.0f32; 4]; 3];
    for d in 0..3 {
        let f = c[d].floor();
        base[d] = f as i64 - 1;
        w[d] = cubic_bspline_weights(c[d] - f);
    }

    let (nx, ny, nz) = (dims[0] as i64, dims[1] as i64, dims[2] as i64);
    let mut acc = 0.0f32;
    for dk in 0..4 {
        let k = mirror_index(base[2] + dk as i64, nz);
        for dj in 0..4 {
            let j = mirror_index(base[1] + dj as i64, ny);
            let wyz = w[2][dk] * w[1][dj];
            for di in 0..4 {
                let i = mirror_index(base[0] + di as i64, nx);
                // SAFETY: mirror_index always returns an in-bounds index.
                acc += wyz * w[0][di] * unsafe { coeffs.get_unchecked(i, j, k) };
            }
        }
    }
    acc
}

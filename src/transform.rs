// transform.rs — Geometric transforms mapping output physical space to input
// physical space.
//
// The resample filter evaluates the transform at every output voxel's
// physical position; the result is where in the *input* volume to sample.
// Two transforms are provided:
//
//   AffineTransform  — 3×3 matrix + translation, 12 parameters.
//   BSplineTransform — cubic free-form deformation over a control-point grid
//                      (p ↦ p + displacement(p)), the standard FFD model.
//
// Parameter layouts follow the usual toolkit conventions so parameter files
// are interchangeable: affine is row-major matrix then translation; B-spline
// is component-major control-point displacements (all x, then y, then z).

use std::fmt;

use crate::interp::cubic_bspline_weights;
use crate::volume::{mat3_inverse, mat3_mul_vec};

/// Errors from transform parameter assignment.
#[derive(Debug, PartialEq, Eq)]
pub enum TransformError {
    /// The flat parameter vector has the wrong length for this transform.
    WrongParameterCount { expected: usize, got: usize },
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::WrongParameterCount { expected, got } => {
                write!(f, "expected {expected} transform parameters, got {got}")
            }
        }
    }
}

impl std::error::Error for TransformError {}

/// A geometric transform from output physical space to input physical space.
///
/// `Sync` because the CPU resample filter evaluates the transform from rayon
/// worker threads.
pub trait Transform: Sync {
    /// Map a physical point.
    fn transform_point(&self, p: [f32; 3]) -> [f32; 3];

    /// Flat parameter vector (layout documented per transform).
    fn parameters(&self) -> Vec<f32>;

    /// Assign the flat parameter vector.
    fn set_parameters(&mut self, params: &[f32]) -> Result<(), TransformError>;

    /// Type name for the harness report line.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// AffineTransform
// ---------------------------------------------------------------------------

/// 3-D affine transform: `p ↦ M·p + t`.
///
/// Parameter layout (12): row-major matrix `m00..m22`, then translation
/// `t0, t1, t2`. Defaults to identity.
#[derive(Debug, Clone)]
pub struct AffineTransform {
    pub matrix: [[f32; 3]; 3],
    pub translation: [f32; 3],
}

impl Default for AffineTransform {
    fn default() -> Self {
        AffineTransform {
            matrix: crate::volume::IDENTITY,
            translation: [0.0; 3],
        }
    }
}

impl AffineTransform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for AffineTransform {
    #[inline]
    fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let r = mat3_mul_vec(&self.matrix, p);
        [
            r[0] + self.translation[0],
            r[1] + self.translation[1],
            r[2] + self.translation[2],
        ]
    }

    fn parameters(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(12);
        for row in &self.matrix {
            out.extend_from_slice(row);
        }
        out.extend_from_slice(&self.translation);
        out
    }

    fn set_parameters(&mut self, params: &[f32]) -> Result<(), TransformError> {
        if params.len() != 12 {
            return Err(TransformError::WrongParameterCount {
                expected: 12,
                got: params.len(),
            });
        }
        for i in 0..3 {
            for j in 0..3 {
                self.matrix[i][j] = params[i * 3 + j];
            }
        }
        self.translation.copy_from_slice(&params[9..12]);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AffineTransform"
    }
}

// ---------------------------------------------------------------------------
// BSplineTransform
// ---------------------------------------------------------------------------

/// Cubic B-spline free-form deformation: `p ↦ p + d(p)` where `d` is a
/// displacement field spanned by a regular control-point grid.
///
/// The transform domain is a box: `origin`, `direction`, and physical
/// dimensions split into `mesh_size` cells per axis. A cubic spline's 4-wide
/// support needs one extra control-point layer before the domain and two
/// after, so the grid holds `mesh_size + 3` points per axis.
///
/// Parameter layout (component-major, as toolkit parameter files expect):
/// `n = Πd (mesh[d] + 3)` displacements for x, then `n` for y, then `n` for z,
/// each block in x-fastest node order.
///
/// Points outside the domain are mapped to themselves (zero displacement).
pub struct BSplineTransform {
    domain_origin: [f32; 3],
    dir_inv: [[f32; 3]; 3],
    grid_spacing: [f32; 3],
    mesh_size: [usize; 3],
    grid_dims: [usize; 3],
    /// Control-point displacements, component-major. Length 3 * grid volume.
    coefficients: Vec<f32>,
}

impl BSplineTransform {
    /// Create an identity FFD (all displacements zero) over the given domain.
    ///
    /// `physical_dims` is the extent of the domain box along each (direction)
    /// axis; `mesh_size` the number of spline cells per axis.
    ///
    /// # Panics
    /// Panics if any mesh dimension is zero, any physical dimension is not
    /// positive, or the direction matrix is singular.
    pub fn new(
        domain_origin: [f32; 3],
        domain_direction: [[f32; 3]; 3],
        physical_dims: [f32; 3],
        mesh_size: [usize; 3],
    ) -> Self {
        assert!(
            mesh_size.iter().all(|&m| m > 0),
            "mesh size must be non-zero, got {mesh_size:?}"
        );
        assert!(
            physical_dims.iter().all(|&d| d > 0.0),
            "physical dimensions must be positive, got {physical_dims:?}"
        );
        let dir_inv = mat3_inverse(&domain_direction)
            .unwrap_or_else(|| panic!("singular domain direction: {domain_direction:?}"));
        let grid_spacing = [
            physical_dims[0] / mesh_size[0] as f32,
            physical_dims[1] / mesh_size[1] as f32,
            physical_dims[2] / mesh_size[2] as f32,
        ];
        let grid_dims = [mesh_size[0] + 3, mesh_size[1] + 3, mesh_size[2] + 3];
        let n = grid_dims[0] * grid_dims[1] * grid_dims[2];
        BSplineTransform {
            domain_origin,
            dir_inv,
            grid_spacing,
            mesh_size,
            grid_dims,
            coefficients: vec![0.0; 3 * n],
        }
    }

    /// Number of control-point grid nodes (per component).
    pub fn num_nodes(&self) -> usize {
        self.grid_dims[0] * self.grid_dims[1] * self.grid_dims[2]
    }

    /// Total parameter count (3 components × nodes).
    pub fn num_parameters(&self) -> usize {
        3 * self.num_nodes()
    }

    pub fn grid_dims(&self) -> [usize; 3] {
        self.grid_dims
    }

    pub fn grid_spacing(&self) -> [f32; 3] {
        self.grid_spacing
    }

    pub fn domain_origin(&self) -> [f32; 3] {
        self.domain_origin
    }

    /// Inverse of the domain direction matrix (physical → grid axes).
    pub fn domain_dir_inv(&self) -> [[f32; 3]; 3] {
        self.dir_inv
    }

    /// Raw control-point displacements, component-major. Uploaded verbatim to
    /// the GPU control-grid buffer.
    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    #[inline]
    fn node(&self, comp: usize, i: usize, j: usize, k: usize) -> f32 {
        let n = self.num_nodes();
        self.coefficients[comp * n + (k * self.grid_dims[1] + j) * self.grid_dims[0] + i]
    }
}

impl Transform for BSplineTransform {
    fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        // Grid coordinates: u = local/spacing + 1. The +1 accounts for the
        // border control-point layer before the domain origin, so the domain
        // box spans u ∈ [1, mesh+1].
        let rel = [
            p[0] - self.domain_origin[0],
            p[1] - self.domain_origin[1],
            p[2] - self.domain_origin[2],
        ];
        let local = mat3_mul_vec(&self.dir_inv, rel);

        let mut base = [0i64; 3];
        let mut w = [[0.0f32; 4]; 3];
        for d in 0..3 {
            let u = local[d] / self.grid_spacing[d] + 1.0;
            let mut f = u.floor();
            let mut t = u - f;
            // The far domain edge (u exactly mesh+1) belongs to the last cell.
            if f as i64 == self.mesh_size[d] as i64 + 1 && t == 0.0 {
                f -= 1.0;
                t = 1.0;
            }
            let i0 = f as i64 - 1;
            if i0 < 0 || i0 + 3 > self.grid_dims[d] as i64 - 1 {
                // Outside the transform domain: zero displacement.
                return p;
            }
            base[d] = i0;
            w[d] = cubic_bspline_weights(t);
        }

        let mut disp = [0.0f32; 3];
        for dk in 0..4 {
            let k = (base[2] + dk as i64) as usize;
            for dj in 0..4 {
                let j = (base[1] + dj as i64) as usize;
                let wyz = w[2][dk] * w[1][dj];
                for di in 0..4 {
                    let i = (base[0] + di as i64) as usize;
                    let weight = wyz * w[0][di];
                    for (c, dc) in disp.iter_mut().enumerate() {
                        *dc += weight * self.node(c, i, j, k);
                    }
                }
            }
        }

        [p[0] + disp[0], p[1] + disp[1], p[2] + disp[2]]
    }

    fn parameters(&self) -> Vec<f32> {
        self.coefficients.clone()
    }

    fn set_parameters(&mut self, params: &[f32]) -> Result<(), TransformError> {
        let expected = self.num_parameters();
        if params.len() != expected {
            return Err(TransformError::WrongParameterCount {
                expected,
                got: params.len(),
            });
        }
        self.coefficients.copy_from_slice(params);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "BSplineTransform"
    }
}

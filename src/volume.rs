// volume.rs — Runtime-sized 3-D volume container, generic over voxel type.
//
// Unlike a plain 2-D image, a medical volume carries physical-space metadata:
// voxel spacing (mm), the physical position of voxel (0,0,0), and a 3×3
// direction matrix (axis orientation cosines). Resampling is defined in
// physical space, so the index↔point mapping lives here:
//
//   point = origin + direction · (spacing ⊙ index)
//   index = (1/spacing) ⊙ (direction⁻¹ · (point − origin))
//
// Memory layout is x-fastest (x, then y, then z), contiguous with no padding:
//
//   flat index = (z * ny + y) * nx + x
//
// GPU storage buffers use the same layout, so upload/readback is a straight
// memcpy of the flat slice plus a pixel-type conversion.

use std::fmt;

// ---------------------------------------------------------------------------
// Voxel trait
// ---------------------------------------------------------------------------

/// Trait for types that can serve as voxel values in a `Volume`.
///
/// Bounds: `Copy` (trivially copyable), `Default` (zero value for `new()`),
/// `Send + Sync + 'static` (volumes cross thread boundaries in the rayon
/// resample loop), `PartialOrd` (comparisons in tests and metrics).
pub trait Voxel: Copy + Default + Send + Sync + PartialOrd + 'static {
    /// Raw cast to f32 (not normalized). All interpolation runs in f32.
    fn to_f32(self) -> f32;

    /// Construct a voxel from f32, clamping to the type's range and rounding
    /// half away from zero. The GPU readback path uses the same conversion so
    /// CPU and GPU outputs only differ by float interpolation error.
    fn from_f32(v: f32) -> Self;
}

impl Voxel for i16 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(i16::MIN as f32, i16::MAX as f32).round() as i16
    }
}

impl Voxel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Voxel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Volume<T>
// ---------------------------------------------------------------------------

/// A 3-D volume with runtime dimensions and physical-space metadata.
pub struct Volume<T: Voxel> {
    /// Voxel data, x-fastest. Length = nx * ny * nz.
    data: Vec<T>,
    /// Dimensions [nx, ny, nz] in voxels.
    dims: [usize; 3],
    /// Voxel spacing in physical units (mm). All components > 0.
    spacing: [f32; 3],
    /// Physical position of voxel (0, 0, 0).
    origin: [f32; 3],
    /// Direction cosine matrix, row-major. Identity for axis-aligned volumes.
    direction: [[f32; 3]; 3],
}

impl<T: Voxel> Clone for Volume<T> {
    // Manual impl to document that this deep-copies the voxel buffer.
    fn clone(&self) -> Self {
        Volume {
            data: self.data.clone(),
            dims: self.dims,
            spacing: self.spacing,
            origin: self.origin,
            direction: self.direction,
        }
    }
}

impl<T: Voxel> Volume<T> {
    // --- Constructors ---

    /// Create a zero-initialized volume with unit spacing, zero origin and
    /// identity direction.
    pub fn new(dims: [usize; 3]) -> Self {
        Self::with_geometry(dims, [1.0; 3], [0.0; 3], IDENTITY)
    }

    /// Create a zero-initialized volume with explicit geometry.
    ///
    /// # Panics
    /// Panics if any dimension is zero or any spacing component is not > 0.
    pub fn with_geometry(
        dims: [usize; 3],
        spacing: [f32; 3],
        origin: [f32; 3],
        direction: [[f32; 3]; 3],
    ) -> Self {
        assert!(
            dims.iter().all(|&d| d > 0),
            "volume dimensions must be non-zero, got {dims:?}"
        );
        assert!(
            spacing.iter().all(|&s| s > 0.0),
            "voxel spacing must be positive, got {spacing:?}"
        );
        Volume {
            data: vec![T::default(); dims[0] * dims[1] * dims[2]],
            dims,
            spacing,
            origin,
            direction,
        }
    }

    /// Create a volume from an existing voxel vector (unit geometry).
    ///
    /// # Panics
    /// Panics if `data.len() != nx * ny * nz`.
    pub fn from_vec(dims: [usize; 3], data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            dims[0] * dims[1] * dims[2],
            "data length ({}) must equal nx*ny*nz ({})",
            data.len(),
            dims[0] * dims[1] * dims[2],
        );
        Volume {
            data,
            dims,
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: IDENTITY,
        }
    }

    // --- Accessors ---

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline]
    pub fn spacing(&self) -> [f32; 3] {
        self.spacing
    }

    #[inline]
    pub fn origin(&self) -> [f32; 3] {
        self.origin
    }

    #[inline]
    pub fn direction(&self) -> [[f32; 3]; 3] {
        self.direction
    }

    pub fn set_spacing(&mut self, spacing: [f32; 3]) {
        assert!(spacing.iter().all(|&s| s > 0.0));
        self.spacing = spacing;
    }

    pub fn set_origin(&mut self, origin: [f32; 3]) {
        self.origin = origin;
    }

    pub fn set_direction(&mut self, direction: [[f32; 3]; 3]) {
        self.direction = direction;
    }

    /// Total number of voxels.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the voxel at (x, y, z).
    ///
    /// # Panics
    /// Panics if the index is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.bounds_check(x, y, z);
        self.data[(z * self.dims[1] + y) * self.dims[0] + x]
    }

    /// Get voxel value without bounds checking.
    ///
    /// # Safety
    /// Caller must guarantee x < nx, y < ny, z < nz. Used in the interpolation
    /// inner loops where bounds are validated once per sample.
    #[inline(always)]
    pub unsafe fn get_unchecked(&self, x: usize, y: usize, z: usize) -> T {
        debug_assert!(
            x < self.dims[0] && y < self.dims[1] && z < self.dims[2],
            "get_unchecked({x},{y},{z}) out of bounds for {:?}",
            self.dims
        );
        *self
            .data
            .get_unchecked((z * self.dims[1] + y) * self.dims[0] + x)
    }

    /// Set the voxel at (x, y, z).
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        self.bounds_check(x, y, z);
        self.data[(z * self.dims[1] + y) * self.dims[0] + x] = value;
    }

    /// Access the underlying data as a flat x-fastest slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the underlying data.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    // --- Physical space mapping ---

    /// Physical point of a continuous index.
    ///
    /// `point = origin + direction · (spacing ⊙ index)`
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

    /// Continuous index of a physical point, using a precomputed direction
    /// inverse. The inverse is hoisted out because the resample loop calls
    /// this once per output voxel.
    #[inline]
    pub fn point_to_index(&self, p: [f32; 3], dir_inv: &[[f32; 3]; 3]) -> [f32; 3] {
        let rel = [
            p[0] - self.origin[0],
            p[1] - self.origin[1],
            p[2] - self.origin[2],
        ];
        let rotated = mat3_mul_vec(dir_inv, rel);
        [
            rotated[0] / self.spacing[0],
            rotated[1] / self.spacing[1],
            rotated[2] / self.spacing[2],
        ]
    }

    /// Inverse of this volume's direction matrix.
    ///
    /// # Panics
    /// Panics if the direction matrix is singular — that is a corrupt header,
    /// not a recoverable condition.
    pub fn direction_inverse(&self) -> [[f32; 3]; 3] {
        mat3_inverse(&self.direction)
            .unwrap_or_else(|| panic!("singular direction matrix: {:?}", self.direction))
    }

    /// Convert every voxel to f32, preserving geometry.
    pub fn to_f32(&self) -> Volume<f32> {
        Volume {
            data: self.data.iter().map(|v| v.to_f32()).collect(),
            dims: self.dims,
            spacing: self.spacing,
            origin: self.origin,
            direction: self.direction,
        }
    }

    // --- Internal ---

    #[inline]
    fn bounds_check(&self, x: usize, y: usize, z: usize) {
        assert!(
            x < self.dims[0] && y < self.dims[1] && z < self.dims[2],
            "voxel ({x},{y},{z}) out of bounds for volume {:?}",
            self.dims,
        );
    }
}

impl<T: Voxel + fmt::Debug> fmt::Debug for Volume<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Volume<{}> {{ {}×{}×{}, spacing {:?}, origin {:?} }}",
            std::any::type_name::<T>(),
            self.dims[0],
            self.dims[1],
            self.dims[2],
            self.spacing,
            self.origin,
        )
    }
}

// ---------------------------------------------------------------------------
// 3×3 matrix helpers
// ---------------------------------------------------------------------------
// Direction and affine matrices are fixed 3×3 — plain arrays beat a matrix
// crate here and keep the WGSL port one-to-one.

/// Row-major identity matrix.
pub const IDENTITY: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// m · v for a row-major 3×3 matrix.
#[inline]
pub fn mat3_mul_vec(m: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Inverse of a row-major 3×3 matrix via the adjugate. Returns `None` when
/// the determinant is (near) zero.
pub fn mat3_inverse(m: &[[f32; 3]; 3]) -> Option<[[f32; 3]; 3]> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_zero_initialized() {
        let vol: Volume<i16> = Volume::new([4, 3, 2]);
        assert_eq!(vol.dims(), [4, 3, 2]);
        assert_eq!(vol.len(), 24);
        assert!(vol.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut vol: Volume<i16> = Volume::new([4, 3, 2]);
        vol.set(0, 0, 0, 10);
        vol.set(3, 2, 1, -42);
        vol.set(1, 1, 1, 7);
        assert_eq!(vol.get(0, 0, 0), 10);
        assert_eq!(vol.get(3, 2, 1), -42);
        assert_eq!(vol.get(1, 1, 1), 7);
        assert_eq!(vol.get(2, 2, 0), 0); // untouched voxel
    }

    #[test]
    fn test_from_vec_layout() {
        // 2×2×2 volume, x-fastest:
        //   z=0: [0, 1; 2, 3]   z=1: [4, 5; 6, 7]
        let vol = Volume::from_vec([2, 2, 2], (0i16..8).collect());
        assert_eq!(vol.get(0, 0, 0), 0);
        assert_eq!(vol.get(1, 0, 0), 1);
        assert_eq!(vol.get(0, 1, 0), 2);
        assert_eq!(vol.get(0, 0, 1), 4);
        assert_eq!(vol.get(1, 1, 1), 7);
    }

    #[test]
    fn test_index_to_point_identity() {
        let mut vol: Volume<i16> = Volume::new([4, 4, 4]);
        vol.set_spacing([2.0, 3.0, 4.0]);
        vol.set_origin([10.0, 20.0, 30.0]);
        let p = vol.index_to_point([1.0, 1.0, 1.0]);
        assert_eq!(p, [12.0, 23.0, 34.0]);
    }

    #[test]
    fn test_point_index_roundtrip() {
        let mut vol: Volume<i16> = Volume::new([8, 8, 8]);
        vol.set_spacing([1.5, 0.5, 2.0]);
        vol.set_origin([-3.0, 4.0, 0.5]);
        let dir_inv = vol.direction_inverse();
        let idx = [2.25, 5.5, 1.75];
        let p = vol.index_to_point(idx);
        let back = vol.point_to_index(p, &dir_inv);
        for d in 0..3 {
            assert!((back[d] - idx[d]).abs() < 1e-4, "axis {d}: {back:?} vs {idx:?}");
        }
    }

    #[test]
    fn test_point_index_roundtrip_with_direction() {
        // 90° rotation about z: x→y, y→−x.
        let dir = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let vol: Volume<f32> = Volume::with_geometry([4, 4, 4], [1.0; 3], [5.0, 5.0, 5.0], dir);
        let dir_inv = vol.direction_inverse();
        let idx = [1.0, 2.0, 3.0];
        let p = vol.index_to_point(idx);
        assert_eq!(p, [5.0 - 2.0, 5.0 + 1.0, 5.0 + 3.0]);
        let back = vol.point_to_index(p, &dir_inv);
        for d in 0..3 {
            assert!((back[d] - idx[d]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_mat3_inverse_identity() {
        let inv = mat3_inverse(&IDENTITY).unwrap();
        assert_eq!(inv, IDENTITY);
    }

    #[test]
    fn test_mat3_inverse_roundtrip() {
        let m = [[1.03, 0.2, 0.0], [-0.21, 1.12, 0.3], [0.0, 0.01, 0.8]];
        let inv = mat3_inverse(&m).unwrap();
        // m · m⁻¹ ≈ I, checked column by column through mat3_mul_vec.
        for (col, e) in [
            ([1.0, 0.0, 0.0], 0usize),
            ([0.0, 1.0, 0.0], 1),
            ([0.0, 0.0, 1.0], 2),
        ] {
            let v = mat3_mul_vec(&m, mat3_mul_vec(&inv, col));
            for d in 0..3 {
                let expected = if d == e { 1.0 } else { 0.0 };
                assert!((v[d] - expected).abs() < 1e-5, "({e},{d}): {v:?}");
            }
        }
    }

    #[test]
    fn test_mat3_inverse_singular() {
        let m = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]];
        assert!(mat3_inverse(&m).is_none());
    }

    #[test]
    fn test_voxel_from_f32_rounding() {
        assert_eq!(i16::from_f32(1.5), 2);
        assert_eq!(i16::from_f32(-1.5), -2);
        assert_eq!(i16::from_f32(40000.0), i16::MAX);
        assert_eq!(i16::from_f32(-40000.0), i16::MIN);
        assert_eq!(u8::from_f32(-3.0), 0);
        assert_eq!(u8::from_f32(300.0), 255);
    }

    #[test]
    fn test_to_f32_preserves_geometry() {
        let mut vol: Volume<i16> = Volume::new([2, 2, 2]);
        vol.set_spacing([0.5, 0.5, 2.0]);
        vol.set_origin([1.0, 2.0, 3.0]);
        vol.set(1, 0, 1, -7);
        let f = vol.to_f32();
        assert_eq!(f.spacing(), [0.5, 0.5, 2.0]);
        assert_eq!(f.origin(), [1.0, 2.0, 3.0]);
        assert_eq!(f.get(1, 0, 1), -7.0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_bounds() {
        let vol: Volume<i16> = Volume::new([4, 4, 4]);
        vol.get(4, 0, 0);
    }

    #[test]
    #[should_panic(expected = "spacing")]
    fn test_zero_spacing_rejected() {
        let _ = Volume::<i16>::with_geometry([2, 2, 2], [1.0, 0.0, 1.0], [0.0; 3], IDENTITY);
    }
}

// metrics.rs — Numeric comparison between two resampled outputs.
//
// The harness's pass/fail signal: root-mean-square error over all voxels,
// accumulated in f64 (a 512³ volume sums 10⁸ squared terms — f32
// accumulation would lose the small differences we are trying to measure).

use crate::volume::{Volume, Voxel};

/// Root-mean-square error between two same-shaped volumes.
///
/// # Panics
/// Panics if the volumes have different dimensions — comparing outputs from
/// mismatched grids is a harness bug, not a measurement.
pub fn rmse<T: Voxel>(a: &Volume<T>, b: &Volume<T>) -> f64 {
    assert_eq!(
        a.dims(),
        b.dims(),
        "cannot compare volumes of different dimensions"
    );
    let sum_sq: f64 = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(&x, &y)| {
            let err = x.to_f32() as f64 - y.to_f32() as f64;
            err * err
        })
        .sum();
    (sum_sq / a.len() as f64).sqrt()
}

/// Largest absolute per-voxel difference. Reported alongside RMSE for
/// diagnosing localized disagreements that the mean washes out.
pub fn max_abs_diff<T: Voxel>(a: &Volume<T>, b: &Volume<T>) -> f64 {
    assert_eq!(a.dims(), b.dims());
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(&x, &y)| (x.to_f32() as f64 - y.to_f32() as f64).abs())
        .fold(0.0, f64::max)
}

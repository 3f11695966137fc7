// gpu/mod.rs — GPU resampling layer.
//
// Mirrors the CPU pipeline in the parent crate on the GPU: the same
// transform and interpolator choices drive a WGSL compute kernel, one thread
// per output voxel. The CPU implementation in `resample.rs` remains the
// authoritative reference — the kernel reproduces its arithmetic (f32
// throughout, same inside test, same mirror/clamp rules) and the
// `resample-compare` harness gates on the RMSE between the two outputs.
//
// Host/device split:
//
//   host   — volume upload (i16 → f32 conversion), B-spline coefficient
//            prefilter, uniform/bind-group construction, readback.
//   device — the per-voxel resample loop: grid mapping, transform,
//            interpolation.
//
// Readback is the explicit synchronization point: `GpuVolume::sync_to_host`
// stalls until the device has finished and the output buffer is mapped. The
// harness forces it every timed iteration so GPU timings include the
// device→host copy, as a real consumer would experience them.

pub mod device;
pub mod volume;
pub mod resample;

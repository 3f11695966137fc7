// voxwarp: CPU-reference and GPU-accelerated resampling for 3-D medical volumes.
//
// The CPU implementation is the authoritative reference — the GPU resample
// kernel mirrors its arithmetic and is validated against it voxel-for-voxel.
// The `resample-compare` binary runs both pipelines from the same transform
// and interpolator choices, reports elapsed time, and gates on the RMSE
// between the two outputs.

pub mod volume;
pub mod transform;
pub mod interp;
pub mod resample;
pub mod metrics;
pub mod io;

pub mod gpu;

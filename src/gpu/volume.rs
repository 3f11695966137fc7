// gpu/volume.rs — Volumes as GPU storage buffers.
//
// Device-side layout matches the CPU exactly: a flat f32 buffer, x fastest,
// then y, then z. No 3-D textures — texture sampling would change the
// interpolation arithmetic (hardware filtering is reduced-precision), and the
// whole point is matching the CPU reference bit-for-operation. Geometry
// (spacing/origin/direction) stays host-side; the resample pipeline packs it
// into its uniform buffer.

use wgpu::util::DeviceExt;

use crate::gpu::device::GpuDevice;
use crate::resample::OutputGrid;
use crate::volume::{Volume, Voxel};

/// A volume resident on the GPU as a read/write storage buffer of f32.
pub struct GpuVolume {
    pub buffer: wgpu::Buffer,
    pub dims: [u32; 3],
    pub spacing: [f32; 3],
    pub origin: [f32; 3],
    pub direction: [[f32; 3]; 3],
}

impl GpuVolume {
    /// Upload a host volume. The buffer contents are exactly the host slice
    /// (same flat ordering), so what the kernel reads is what the CPU read.
    pub fn upload(gpu: &GpuDevice, vol: &Volume<f32>) -> Self {
        let dims = vol.dims();
        let buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gpu-volume-input"),
                contents: bytemuck::cast_slice(vol.as_slice()),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            });
        GpuVolume {
            buffer,
            dims: [dims[0] as u32, dims[1] as u32, dims[2] as u32],
            spacing: vol.spacing(),
            origin: vol.origin(),
            direction: vol.direction(),
        }
    }

    /// Allocate a zeroed output volume covering an output grid.
    pub fn new_output(gpu: &GpuDevice, grid: &OutputGrid) -> Self {
        let n = grid.num_voxels();
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gpu-volume-output"),
            size: (n * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        GpuVolume {
            buffer,
            dims: [
                grid.size[0] as u32,
                grid.size[1] as u32,
                grid.size[2] as u32,
            ],
            spacing: grid.spacing,
            origin: grid.origin,
            direction: grid.direction,
        }
    }

    /// Number of voxels.
    pub fn len(&self) -> usize {
        (self.dims[0] * self.dims[1] * self.dims[2]) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the buffer back to the host, blocking until the device is done.
    ///
    /// This is the explicit synchronization point of the GPU pipeline: it
    /// submits a copy to a staging buffer, maps it, and polls the device to
    /// completion. The timing harness calls it once per iteration so GPU
    /// timings include the device→host transfer.
    pub fn sync_to_host(&self, gpu: &GpuDevice) -> Vec<f32> {
        let size = (self.len() * std::mem::size_of::<f32>()) as u64;
        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gpu-volume-staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gpu-volume-readback"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, size);
        gpu.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        gpu.device.poll(wgpu::Maintain::Wait);

        // The callback has fired by the time poll(Wait) returns; a missing or
        // failed map means the device was lost mid-copy.
        match rx.recv() {
            Ok(Ok(())) => {}
            _ => panic!("GPU readback failed: device lost during buffer map"),
        }

        let data: Vec<f32> = bytemuck::cast_slice(&slice.get_mapped_range()).to_vec();
        staging.unmap();
        data
    }

    /// Read back into a host `Volume<T>`, converting each f32 through
    /// [`Voxel::from_f32`] — the same cast the CPU filter applies, so the two
    /// outputs are compared after identical quantization.
    pub fn to_volume<T: Voxel>(&self, gpu: &GpuDevice) -> Volume<T> {
        let data = self.sync_to_host(gpu);
        let dims = [
            self.dims[0] as usize,
            self.dims[1] as usize,
            self.dims[2] as usize,
        ];
        let mut vol = Volume::from_vec(dims, data.into_iter().map(T::from_f32).collect());
        vol.set_spacing(self.spacing);
        vol.set_origin(self.origin);
        vol.set_direction(self.direction);
        vol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Subprocess isolation: wgpu device loss aborts the process on some
    // drivers, so each GPU test body runs in its own `cargo test` child and
    // reports success by printing GPU_TEST_OK.

    fn run_isolated(test: &str) {
        let out = std::process::Command::new(env!("CARGO"))
            .args(["test", "--release", test, "--", "--include-ignored", "--nocapture"])
            .env("VOXWARP_GPU_WORKER", "1")
            .output()
            .expect("failed to spawn test subprocess");
        let stdout = String::from_utf8_lossy(&out.stdout);
        assert!(
            stdout.contains("GPU_TEST_OK"),
            "subprocess failed:\n{stdout}\n{}",
            String::from_utf8_lossy(&out.stderr)
        );
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_upload_roundtrip() {
        if std::env::var("VOXWARP_GPU_WORKER").is_err() {
            run_isolated("gpu::volume::tests::test_upload_roundtrip");
            return;
        }
        let gpu = GpuDevice::new().unwrap();
        let mut vol: Volume<f32> = Volume::new([8, 6, 4]);
        for (i, v) in vol.as_mut_slice().iter_mut().enumerate() {
            *v = i as f32 * 0.25 - 10.0;
        }
        vol.set_spacing([0.5, 1.0, 2.5]);

        let gv = GpuVolume::upload(&gpu, &vol);
        assert_eq!(gv.dims, [8, 6, 4]);
        let back = gv.sync_to_host(&gpu);
        assert_eq!(back.as_slice(), vol.as_slice());
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_to_volume_carries_geometry_and_quantizes() {
        if std::env::var("VOXWARP_GPU_WORKER").is_err() {
            run_isolated("gpu::volume::tests::test_to_volume_carries_geometry_and_quantizes");
            return;
        }
        let gpu = GpuDevice::new().unwrap();
        let mut vol = Volume::from_vec([2, 1, 1], vec![10.5f32, -3.5]);
        vol.set_spacing([0.7, 1.3, 2.1]);
        vol.set_origin([-5.0, 2.0, 9.0]);

        let gv = GpuVolume::upload(&gpu, &vol);
        let back: Volume<i16> = gv.to_volume(&gpu);
        assert_eq!(back.spacing(), vol.spacing());
        assert_eq!(back.origin(), vol.origin());
        assert_eq!(back.direction(), vol.direction());
        // Round half away from zero, like the CPU filter's voxel cast.
        assert_eq!(back.as_slice(), &[11, -4]);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_output_volume_is_zeroed() {
        if std::env::var("VOXWARP_GPU_WORKER").is_err() {
            run_isolated("gpu::volume::tests::test_output_volume_is_zeroed");
            return;
        }
        let gpu = GpuDevice::new().unwrap();
        let grid = OutputGrid {
            size: [5, 4, 3],
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: crate::volume::IDENTITY,
        };
        let gv = GpuVolume::new_output(&gpu, &grid);
        assert_eq!(gv.len(), 60);
        let data = gv.sync_to_host(&gpu);
        assert!(data.iter().all(|&v| v == 0.0));
        println!("GPU_TEST_OK");
    }
}

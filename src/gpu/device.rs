// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and select the first non-CPU one.
//   - Provide `WorkgroupSize` — the 3-D workgroup configuration used when
//     creating the resample compute pipeline, validated against the
//     device's invocation limit.
//   - Ceiling-division dispatch helper for covering a volume.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power-preference heuristics that may
// grab llvmpipe/softpipe on headless machines (the software renderer appears
// as a valid Vulkan device). We enumerate explicitly and prefer real
// hardware, falling back to whatever exists only as a last resort — the
// chosen adapter name is logged so a software fallback is visible.

use std::fmt;

/// A workgroup size configuration for 3-D compute dispatches.
///
/// The product of all three dimensions must not exceed the device's
/// `max_compute_invocations_per_workgroup` (256 under wgpu's default
/// limits, which is what we request).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupSize {
    /// Default: 8×8×4 = 256 invocations. The 8-wide x dimension walks the
    /// volume's fastest-varying axis, keeping storage-buffer loads coalesced;
    /// 256 invocations is exactly wgpu's guaranteed default limit.
    pub const DEFAULT: WorkgroupSize = WorkgroupSize { x: 8, y: 8, z: 4 };

    /// Total invocations per workgroup.
    pub fn total(&self) -> u32 {
        self.x * self.y * self.z
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}×{}×{} ({} invocations)",
            self.x,
            self.y,
            self.z,
            self.total()
        )
    }
}

/// Cached adapter information for logging and the harness banner.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend, self.device_type
        )
    }
}

/// The core GPU context: device, queue, and workgroup configuration.
///
/// Create once and reuse — device initialization is expensive, everything
/// hanging off it is cheap.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is declared
/// last so the `wgpu::Instance` outlives `device` and `queue`; some Vulkan
/// layers crash if the instance dies while device objects still hold
/// back-references to it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    /// Keeps the instance alive until device/queue are dropped. Never
    /// accessed directly.
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` on the first non-CPU Vulkan adapter found.
    ///
    /// # Errors
    /// Returns `Err` if no adapter exists or the device request fails —
    /// the harness treats either as "no OpenCL-class GPU present" and exits.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self, GpuError> {
        // Vulkan only — compute shaders, no rendering conformance needed, so
        // non-conformant adapters (translation layers) are acceptable.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let all_adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .into_iter()
            .collect();

        if all_adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        for a in &all_adapters {
            let info = a.get_info();
            eprintln!(
                "[voxwarp] Vulkan adapter: {} ({:?}, {:?})",
                info.name, info.backend, info.device_type
            );
        }

        // Tier 1: real hardware. Tier 2: take anything (software renderer) —
        // the adapter name was logged above so the fallback is visible.
        let adapter = all_adapters
            .into_iter()
            .find(|a| {
                matches!(
                    a.get_info().device_type,
                    wgpu::DeviceType::DiscreteGpu
                        | wgpu::DeviceType::IntegratedGpu
                        | wgpu::DeviceType::VirtualGpu
                        | wgpu::DeviceType::Other
                )
            })
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::VULKAN)
                    .into_iter()
                    .next()
            })
            .ok_or(GpuError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("voxwarp"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: WorkgroupSize::DEFAULT,
            _instance: instance,
        })
    }

    /// Override the default workgroup size.
    ///
    /// Returns `Err` if the total invocation count exceeds the requested
    /// device limits (we request wgpu defaults, so the cap is 256).
    pub fn set_workgroup_size(&mut self, x: u32, y: u32, z: u32) -> Result<(), GpuError> {
        let total = x * y * z;
        let max = wgpu::Limits::default().max_compute_invocations_per_workgroup;
        if total > max {
            return Err(GpuError::WorkgroupTooLarge { total, max });
        }
        self.workgroup_size = WorkgroupSize { x, y, z };
        Ok(())
    }

    /// Workgroup counts needed to cover a volume of the given dimensions.
    ///
    /// Ceiling division per axis; the shader guards against out-of-bounds
    /// global IDs for the overhang.
    pub fn dispatch_size(&self, dims: [usize; 3]) -> (u32, u32, u32) {
        let ws = self.workgroup_size;
        let dx = (dims[0] as u32 + ws.x - 1) / ws.x;
        let dy = (dims[1] as u32 + ws.y - 1) / ws.y;
        let dz = (dims[2] as u32 + ws.z - 1) / ws.z;
        (dx, dy, dz)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, workgroup: {} }}",
            self.adapter_info, self.workgroup_size
        )
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from GPU initialization, configuration, and pipeline creation.
#[derive(Debug)]
pub enum GpuError {
    /// No Vulkan adapter found at all. Check that Vulkan is installed and
    /// `vulkaninfo` lists a device.
    NoSuitableAdapter,
    /// wgpu device request failed (driver issue, unsupported limits).
    DeviceRequest(wgpu::RequestDeviceError),
    /// Requested workgroup size exceeds the device invocation limit.
    WorkgroupTooLarge { total: u32, max: u32 },
    /// Shader compilation or pipeline validation failed. The resample shader
    /// is specialized per transform/interpolator combination at pipeline
    /// creation, so this is where a bad specialization surfaces.
    ShaderCompile(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoSuitableAdapter => write!(
                f,
                "no Vulkan adapter found — ensure Vulkan is installed and `vulkaninfo` lists a device"
            ),
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::WorkgroupTooLarge { total, max } => write!(
                f,
                "workgroup size {total} exceeds device limit of {max} invocations"
            ),
            GpuError::ShaderCompile(msg) => write!(f, "shader compilation failed: {msg}"),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================
// Tests
// ============================================================

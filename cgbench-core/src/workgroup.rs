//! Work-group sizing for the power-step kernels.
//!
//! The layout is chosen once per device at setup and injected into the
//! offload layer. Latency-oriented devices (CPU adapters) get one work item
//! per group with one group per compute unit; throughput-oriented devices
//! (GPU adapters) get wide groups and a global size rounded up to a multiple
//! of the local size.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound for the local size on wide devices.
pub const DEFAULT_LOCAL_SIZE: u32 = 128;

/// Class of compute device the offload layer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    /// Latency-oriented device (CPU adapter, e.g. a software rasterizer).
    Cpu,
    /// Throughput-oriented device (discrete, integrated or virtual GPU).
    Gpu,
    /// No preference; a discrete GPU wins if present.
    Any,
}

impl DeviceClass {
    pub fn from_device_type(device_type: wgpu::DeviceType) -> Self {
        match device_type {
            wgpu::DeviceType::Cpu => DeviceClass::Cpu,
            _ => DeviceClass::Gpu,
        }
    }

    /// File name of the kernel program for this class.
    pub fn kernel_file(&self) -> &'static str {
        match self {
            DeviceClass::Cpu => "cg_cpu.wgsl",
            DeviceClass::Gpu | DeviceClass::Any => "cg_gpu.wgsl",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Cpu => "cpu",
            DeviceClass::Gpu => "gpu",
            DeviceClass::Any => "any",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceClass::Cpu),
            "gpu" => Ok(DeviceClass::Gpu),
            "any" | "auto" | "" => Ok(DeviceClass::Any),
            other => Err(format!("unknown device class '{}'", other)),
        }
    }
}

/// Resolved launch shape for a one-dimensional kernel over `n` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchGeometry {
    /// Work items per group.
    pub local_size: u32,
    /// Total work items; always a multiple of `local_size`.
    pub global_size: u32,
    /// Contiguous elements each work item covers (1 means grid-stride).
    pub chunk: u32,
}

impl LaunchGeometry {
    /// Number of work groups, which is also the number of partial sums the
    /// reduction kernel produces.
    pub fn groups(&self) -> u32 {
        self.global_size / self.local_size
    }
}

/// Strategy deciding how a kernel over `n` elements is tiled.
pub trait WorkGroupSizing: fmt::Debug + Send + Sync {
    fn geometry(&self, n: usize) -> LaunchGeometry;

    /// Local size baked into the program as the `LSIZE` constant.
    fn local_size(&self) -> u32;

    fn device_class(&self) -> DeviceClass;
}

/// One work item per group, one group per compute unit.
#[derive(Debug, Clone)]
pub struct LatencyOriented {
    pub compute_units: u32,
}

impl WorkGroupSizing for LatencyOriented {
    fn geometry(&self, n: usize) -> LaunchGeometry {
        let units = self.compute_units.max(1);
        let n = n as u32;
        LaunchGeometry {
            local_size: 1,
            global_size: units,
            chunk: n.div_ceil(units).max(1),
        }
    }

    fn local_size(&self) -> u32 {
        1
    }

    fn device_class(&self) -> DeviceClass {
        DeviceClass::Cpu
    }
}

/// Wide work groups sized from the device's work-item limits.
#[derive(Debug, Clone)]
pub struct ThroughputOriented {
    pub local_size: u32,
    /// Maximum number of groups per dispatch dimension.
    pub max_groups: u32,
}

impl ThroughputOriented {
    /// Builds the layout from device limits. The local size is the largest
    /// power of two not above the device maximum and `DEFAULT_LOCAL_SIZE`,
    /// so the in-group tree reduction halves cleanly.
    pub fn from_limits(limits: &wgpu::Limits) -> Self {
        let max_items = limits
            .max_compute_workgroup_size_x
            .min(limits.max_compute_invocations_per_workgroup)
            .min(DEFAULT_LOCAL_SIZE)
            .max(1);
        let local_size = 1u32 << (31 - max_items.leading_zeros());
        Self {
            local_size,
            max_groups: limits.max_compute_workgroups_per_dimension.max(1),
        }
    }
}

impl WorkGroupSizing for ThroughputOriented {
    fn geometry(&self, n: usize) -> LaunchGeometry {
        let rounded = round_work_size(n as u32, self.local_size);
        let groups = (rounded / self.local_size).clamp(1, self.max_groups);
        LaunchGeometry {
            local_size: self.local_size,
            global_size: groups * self.local_size,
            chunk: 1,
        }
    }

    fn local_size(&self) -> u32 {
        self.local_size
    }

    fn device_class(&self) -> DeviceClass {
        DeviceClass::Gpu
    }
}

/// Rounds `work_size` up to the next multiple of `local_size`.
pub fn round_work_size(work_size: u32, local_size: u32) -> u32 {
    work_size.div_ceil(local_size) * local_size
}

/// Chooses the sizing strategy for an adapter.
pub fn sizing_for(
    device_type: wgpu::DeviceType,
    limits: &wgpu::Limits,
) -> Box<dyn WorkGroupSizing> {
    match DeviceClass::from_device_type(device_type) {
        DeviceClass::Cpu => {
            let compute_units = std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1);
            Box::new(LatencyOriented { compute_units })
        }
        _ => Box::new(ThroughputOriented::from_limits(limits)),
    }
}

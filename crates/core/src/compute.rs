//! Compute-unit and engine resolution.
//!
//! Maps the job's abstract compute-unit selection plus engine selection
//! onto a backend family, CPU/GPU admission flags, a device mode and a
//! render engine identifier.
//!
//! There are two resolution paths and they are kept separate on purpose:
//! the regular engines go through a fixed lookup table, while the
//! hardware-accelerated path-trace engine derives its flags from a
//! formula and always targets OPTIX. The two disagree for several compute
//! units (see [`DeviceResolution`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capabilities::HostCapabilities;

/// Engine value that selects hardware-accelerated path tracing.
pub const ENGINE_HARDWARE_PATH_TRACE: i32 = 2;

/// A hardware acceleration technology with its own device enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendFamily {
    Cuda,
    Optix,
    Hip,
    Metal,
    #[serde(rename = "ONEAPI")]
    OneApi,
    #[serde(rename = "OPENCL")]
    OpenCl,
}

impl BackendFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "CUDA",
            Self::Optix => "OPTIX",
            Self::Hip => "HIP",
            Self::Metal => "METAL",
            Self::OneApi => "ONEAPI",
            Self::OpenCl => "OPENCL",
        }
    }

    /// Whether this family is served by the CUDA half of the legacy
    /// combined device list. Everything else falls back to OpenCL.
    pub fn is_cuda_like(&self) -> bool {
        matches!(self, Self::Cuda | Self::Optix)
    }
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device the path tracer runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceMode {
    Cpu,
    Gpu,
}

/// Render engine identifier understood by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderEngine {
    #[serde(rename = "CYCLES")]
    Cycles,
    #[serde(rename = "BLENDER_EEVEE")]
    Eevee,
    #[serde(rename = "BLENDER_EEVEE_NEXT")]
    EeveeNext,
}

impl RenderEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cycles => "CYCLES",
            Self::Eevee => "BLENDER_EEVEE",
            Self::EeveeNext => "BLENDER_EEVEE_NEXT",
        }
    }
}

/// The job's engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSelection {
    PathTraced,
    Realtime,
    HardwarePathTraced,
}

impl EngineSelection {
    /// `1` is realtime, `2` is hardware-accelerated path tracing, and any
    /// other value is the default path tracer.
    pub fn from_raw(engine: i32) -> Self {
        match engine {
            1 => Self::Realtime,
            ENGINE_HARDWARE_PATH_TRACE => Self::HardwarePathTraced,
            _ => Self::PathTraced,
        }
    }

    /// Engine identifier for this selection on the given host.
    pub fn render_engine(&self, caps: &HostCapabilities) -> RenderEngine {
        match self {
            Self::Realtime => caps.realtime_engine,
            Self::PathTraced | Self::HardwarePathTraced => RenderEngine::Cycles,
        }
    }
}

/// Compute-unit selection as sent by the coordinator (`0..=12`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeUnit {
    Cpu = 0,
    Cuda = 1,
    OpenCl = 2,
    CudaGpuOnly = 3,
    OpenClGpuOnly = 4,
    Hip = 5,
    HipGpuOnly = 6,
    Metal = 7,
    MetalGpuOnly = 8,
    OneApi = 9,
    OneApiGpuOnly = 10,
    Optix = 11,
    OptixGpuOnly = 12,
}

impl ComputeUnit {
    pub fn from_raw(value: i32) -> Option<Self> {
        let unit = match value {
            0 => Self::Cpu,
            1 => Self::Cuda,
            2 => Self::OpenCl,
            3 => Self::CudaGpuOnly,
            4 => Self::OpenClGpuOnly,
            5 => Self::Hip,
            6 => Self::HipGpuOnly,
            7 => Self::Metal,
            8 => Self::MetalGpuOnly,
            9 => Self::OneApi,
            10 => Self::OneApiGpuOnly,
            11 => Self::Optix,
            12 => Self::OptixGpuOnly,
            _ => return None,
        };
        Some(unit)
    }

    /// Table entry for this unit. `None` means no accelerator backend
    /// (CPU-only rendering).
    ///
    /// The HIP rows are inverted relative to their labels: `Hip` admits
    /// GPUs only while `HipGpuOnly` also admits the CPU. This mirrors the
    /// coordinator's long-standing behaviour and is left as is.
    pub fn backend_request(&self) -> Option<BackendRequest> {
        use BackendFamily::*;

        let (family, allow_gpu, allow_cpu) = match self {
            Self::Cpu => return None,
            Self::Cuda => (Cuda, true, true),
            Self::OpenCl => (OpenCl, true, true),
            Self::CudaGpuOnly => (Cuda, true, false),
            Self::OpenClGpuOnly => (OpenCl, true, false),
            Self::Hip => (Hip, true, false),
            Self::HipGpuOnly => (Hip, true, true),
            Self::Metal => (Metal, true, true),
            Self::MetalGpuOnly => (Metal, true, false),
            Self::OneApi => (OneApi, true, true),
            Self::OneApiGpuOnly => (OneApi, true, false),
            Self::Optix => (Optix, true, true),
            Self::OptixGpuOnly => (Optix, true, false),
        };
        Some(BackendRequest {
            family,
            allow_gpu,
            allow_cpu,
        })
    }
}

/// Which backend to enumerate and which device classes to admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendRequest {
    pub family: BackendFamily,
    pub allow_gpu: bool,
    pub allow_cpu: bool,
}

/// Outcome of [`resolve`], tagged by the path that produced it.
///
/// The two paths express the same intent differently and do not agree.
/// For example compute unit `1` (CUDA) yields CUDA with GPU+CPU on the
/// table path but OPTIX with GPU+CPU on the hardware path, and compute
/// unit `0` (CPU) enumerates no devices on the table path but still
/// enumerates OPTIX devices (CPU only) on the hardware path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceResolution {
    Table {
        /// `None` for compute-unit values outside the table.
        unit: Option<ComputeUnit>,
        backend: Option<BackendRequest>,
        /// `None` leaves the host's device mode untouched.
        device_mode: Option<DeviceMode>,
    },
    HardwarePathTrace {
        backend: BackendRequest,
        device_mode: DeviceMode,
    },
}

impl DeviceResolution {
    pub fn backend(&self) -> Option<BackendRequest> {
        match self {
            Self::Table { backend, .. } => *backend,
            Self::HardwarePathTrace { backend, .. } => Some(*backend),
        }
    }

    pub fn device_mode(&self) -> Option<DeviceMode> {
        match self {
            Self::Table { device_mode, .. } => *device_mode,
            Self::HardwarePathTrace { device_mode, .. } => Some(*device_mode),
        }
    }
}

/// Resolve a compute unit under the given engine selection.
pub fn resolve(compute_unit: i32, engine: EngineSelection) -> DeviceResolution {
    match engine {
        EngineSelection::HardwarePathTraced => resolve_hardware_path_trace(compute_unit),
        EngineSelection::PathTraced | EngineSelection::Realtime => resolve_table(compute_unit),
    }
}

fn resolve_table(compute_unit: i32) -> DeviceResolution {
    let unit = ComputeUnit::from_raw(compute_unit);
    let backend = unit.and_then(|u| u.backend_request());
    let device_mode = match (unit, backend) {
        (Some(_), Some(_)) => Some(DeviceMode::Gpu),
        (Some(_), None) => Some(DeviceMode::Cpu),
        (None, _) => None,
    };
    DeviceResolution::Table {
        unit,
        backend,
        device_mode,
    }
}

fn resolve_hardware_path_trace(compute_unit: i32) -> DeviceResolution {
    let allow_gpu = matches!(compute_unit, 1 | 3 | 11 | 12);
    let allow_cpu = !matches!(compute_unit, 3 | 12);
    let device_mode = if allow_cpu && !allow_gpu {
        DeviceMode::Cpu
    } else {
        DeviceMode::Gpu
    };
    DeviceResolution::HardwarePathTrace {
        backend: BackendRequest {
            family: BackendFamily::Optix,
            allow_gpu,
            allow_cpu,
        },
        device_mode,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

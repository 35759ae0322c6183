//! Backend device selection.
//!
//! Enumerates the devices of one backend family through an injected
//! [`DeviceEnumerator`] and decides, per device, whether it takes part in
//! the render. A device is used iff it is a CPU and CPU admission was
//! requested, or it is not a CPU and GPU admission was requested.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::capabilities::HostCapabilities;
use crate::compute::{BackendFamily, BackendRequest};
use crate::error::CoreError;

/// Class of a compute device as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceKind {
    Cpu,
    Cuda,
    Optix,
    Hip,
    Metal,
    #[serde(rename = "ONEAPI")]
    OneApi,
    #[serde(rename = "OPENCL")]
    OpenCl,
}

/// A device as enumerated by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeDevice {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
}

impl ComputeDevice {
    pub fn is_cpu(&self) -> bool {
        self.kind == DeviceKind::Cpu
    }
}

/// Device lists from a host that still uses the combined enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyDeviceLists {
    #[serde(default)]
    pub cuda: Vec<ComputeDevice>,
    #[serde(default)]
    pub opencl: Vec<ComputeDevice>,
}

/// Host-side device enumeration.
pub trait DeviceEnumerator {
    /// Combined CUDA / OpenCL lists (hosts older than per-family queries).
    fn legacy_devices(&self) -> LegacyDeviceLists;

    /// Devices for one named family.
    fn devices_for_family(&self, family: BackendFamily) -> Vec<ComputeDevice>;
}

/// Every device the host reported, captured once per session.
///
/// Families missing from `families` enumerate empty. `legacy` is only
/// consulted by hosts that still use the combined enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInventory {
    #[serde(default)]
    pub families: HashMap<BackendFamily, Vec<ComputeDevice>>,
    #[serde(default)]
    pub legacy: LegacyDeviceLists,
}

impl DeviceInventory {
    /// Non-CPU devices listed for `family`.
    pub fn accelerator_count(&self, family: BackendFamily) -> usize {
        self.families
            .get(&family)
            .map_or(0, |devices| devices.iter().filter(|d| !d.is_cpu()).count())
    }
}

impl DeviceEnumerator for DeviceInventory {
    fn legacy_devices(&self) -> LegacyDeviceLists {
        self.legacy.clone()
    }

    fn devices_for_family(&self, family: BackendFamily) -> Vec<ComputeDevice> {
        self.families.get(&family).cloned().unwrap_or_default()
    }
}

/// A device together with its activation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDevice {
    #[serde(flatten)]
    pub device: ComputeDevice,
    #[serde(rename = "use")]
    pub enabled: bool,
}

/// Activation decisions for every device of the resolved family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceActivationPlan {
    pub family: BackendFamily,
    pub devices: Vec<PlannedDevice>,
}

impl DeviceActivationPlan {
    /// Activation flag for a device id, or `None` if the plan has no such
    /// device.
    pub fn is_enabled(&self, id: &str) -> Option<bool> {
        self.devices
            .iter()
            .find(|d| d.device.id == id)
            .map(|d| d.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.devices.iter().filter(|d| d.enabled).count()
    }
}

/// Whether a device takes part given the admission flags.
pub fn admits(device: &ComputeDevice, allow_gpu: bool, allow_cpu: bool) -> bool {
    (allow_cpu && device.is_cpu()) || (allow_gpu && !device.is_cpu())
}

/// Enumerate the requested family and build its activation plan.
///
/// Under per-family enumeration an empty device list is an error, and no
/// plan is produced. The legacy combined list never errors: CUDA and
/// OPTIX read its CUDA half, every other family reads the OpenCL half.
pub fn select_devices<E: DeviceEnumerator + ?Sized>(
    enumerator: &E,
    caps: &HostCapabilities,
    request: BackendRequest,
) -> Result<DeviceActivationPlan, CoreError> {
    let family = request.family;

    let devices = if caps.legacy_device_enumeration {
        let lists = enumerator.legacy_devices();
        if family.is_cuda_like() {
            lists.cuda
        } else {
            lists.opencl
        }
    } else {
        let devices = enumerator.devices_for_family(family);
        tracing::info!(%family, count = devices.len(), "Devices found");
        if devices.is_empty() {
            return Err(CoreError::NoDevicesFound { family });
        }
        devices
    };

    let devices = devices
        .into_iter()
        .map(|device| {
            let enabled = admits(&device, request.allow_gpu, request.allow_cpu);
            tracing::info!(%family, device = %device.name, enabled, "Device");
            PlannedDevice { device, enabled }
        })
        .collect();

    Ok(DeviceActivationPlan { family, devices })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

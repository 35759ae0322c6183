//! NVML cross-check of the renderer's device inventory.
//!
//! The renderer's `devices` listing is authoritative for every backend
//! family. NVML only counts the NVIDIA GPUs the driver sees, so the worker
//! can warn when the renderer lists fewer CUDA devices than are installed
//! (typically a driver/toolkit mismatch inside the renderer).
//!
//! NVML initialisation is optional: without NVIDIA drivers the count is 0
//! and no cross-check happens.

use nvml_wrapper::Nvml;

use farmhand_core::compute::BackendFamily;
use farmhand_core::devices::DeviceInventory;

pub struct NvmlGpus {
    /// `None` when NVML could not be initialised (no drivers / no GPU).
    nvml: Option<Nvml>,
}

impl Default for NvmlGpus {
    fn default() -> Self {
        Self::new()
    }
}

impl NvmlGpus {
    /// Attempt to initialise NVML.
    pub fn new() -> Self {
        let nvml = match Nvml::init() {
            Ok(nvml) => {
                tracing::info!("NVML initialised successfully");
                Some(nvml)
            }
            Err(e) => {
                tracing::debug!(error = %e, "NVML unavailable, skipping GPU cross-check");
                None
            }
        };
        Self { nvml }
    }

    /// Number of GPUs visible to NVML, or 0 if NVML is unavailable.
    pub fn count(&self) -> u32 {
        self.nvml
            .as_ref()
            .and_then(|nvml| nvml.device_count().ok())
            .unwrap_or(0)
    }

    /// Names of the visible GPUs. Devices that fail to report are skipped.
    pub fn names(&self) -> Vec<String> {
        let Some(nvml) = self.nvml.as_ref() else {
            return Vec::new();
        };
        (0..self.count())
            .filter_map(|idx| match nvml.device_by_index(idx).and_then(|d| d.name()) {
                Ok(name) => Some(name),
                Err(e) => {
                    tracing::warn!(gpu_index = idx, error = %e, "Skipping GPU -- query failed");
                    None
                }
            })
            .collect()
    }
}

/// NVIDIA GPUs the driver reports but the renderer did not list for CUDA
/// or OPTIX (per-family or legacy).
pub fn unlisted_gpus(nvml_count: u32, inventory: &DeviceInventory) -> usize {
    let legacy_cuda = inventory.legacy.cuda.iter().filter(|d| !d.is_cpu()).count();
    let listed = inventory
        .accelerator_count(BackendFamily::Cuda)
        .max(inventory.accelerator_count(BackendFamily::Optix))
        .max(legacy_cuda);
    usize::try_from(nvml_count)
        .unwrap_or(usize::MAX)
        .saturating_sub(listed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

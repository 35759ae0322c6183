//! Job settings application.
//!
//! [`SessionContext`] is the worker's mutable view of the renderer: the
//! active scene, the scene catalog, and the [`RenderSettings`] handed to
//! the external renderer for each frame. [`SessionContext::apply`]
//! translates a job descriptor plus the claimed frame into those settings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::capabilities::HostCapabilities;
use crate::compute::{
    resolve, BackendFamily, DeviceMode, DeviceResolution, EngineSelection, RenderEngine,
};
use crate::devices::{select_devices, DeviceActivationPlan, DeviceEnumerator, PlannedDevice};
use crate::error::CoreError;
use crate::inspection::InspectionReport;
use crate::job::{frame_output_path, Border, FrameClaim, JobDescriptor, TileSize, DEFAULT_OUTPUT_FORMAT};

/// Resolution percentage applied to every job.
pub const RESOLUTION_PERCENTAGE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreadsMode {
    Auto,
    Fixed,
}

/// Renderer configuration for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub scene: String,
    pub file_format: String,
    pub threads_mode: ThreadsMode,
    pub threads: usize,
    /// `None` when the host does not take tile sizes.
    pub tile: Option<TileSize>,
    pub use_border: bool,
    pub crop_to_border: bool,
    pub film_transparent: bool,
    pub border: Border,
    pub camera: Option<String>,
    pub resolution_x: i64,
    pub resolution_y: i64,
    pub resolution_percentage: u32,
    pub samples: i64,
    pub use_persistent_data: bool,
    pub compute_device_type: Option<BackendFamily>,
    pub device_mode: Option<DeviceMode>,
    pub devices: Vec<PlannedDevice>,
    pub fps: Option<f64>,
    pub engine: RenderEngine,
    pub frame: FrameClaim,
    pub filepath: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            scene: String::new(),
            file_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            threads_mode: ThreadsMode::Auto,
            threads: 0,
            tile: None,
            use_border: false,
            crop_to_border: false,
            film_transparent: false,
            border: Border::default(),
            camera: None,
            resolution_x: 0,
            resolution_y: 0,
            resolution_percentage: RESOLUTION_PERCENTAGE,
            samples: 0,
            use_persistent_data: false,
            compute_device_type: None,
            device_mode: None,
            devices: Vec::new(),
            fps: None,
            engine: RenderEngine::Cycles,
            frame: 0,
            filepath: String::new(),
        }
    }
}

impl RenderSettings {
    /// Initial settings as stored in the project.
    pub fn from_inspection(report: &InspectionReport) -> Self {
        Self {
            scene: report.selected_scene.clone(),
            camera: Some(report.selected_camera.clone()).filter(|c| !c.is_empty()),
            resolution_x: i64::from(report.render_width),
            resolution_y: i64::from(report.render_height),
            samples: i64::from(report.samples),
            fps: Some(report.fps).filter(|fps| *fps > 0.0),
            ..Self::default()
        }
    }
}

/// Scenes in the project and the objects each one contains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneCatalog {
    scenes: Vec<String>,
    objects: HashMap<String, Vec<String>>,
}

impl SceneCatalog {
    pub fn new(scenes: Vec<String>, objects: HashMap<String, Vec<String>>) -> Self {
        Self { scenes, objects }
    }

    /// Build from an inspection record. When the record has no per-scene
    /// object lists, the selected scene's objects are its cameras.
    pub fn from_inspection(report: &InspectionReport) -> Self {
        let mut objects = report.scene_objects.clone();
        objects
            .entry(report.selected_scene.clone())
            .or_insert_with(|| report.cameras.clone());
        Self::new(report.scenes.clone(), objects)
    }

    pub fn contains(&self, scene: &str) -> bool {
        self.scenes.iter().any(|s| s == scene)
    }

    pub fn has_object(&self, scene: &str, object: &str) -> bool {
        self.objects
            .get(scene)
            .is_some_and(|objs| objs.iter().any(|o| o == object))
    }
}

/// Device and engine decisions, made once per session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub resolution: DeviceResolution,
    pub plan: Option<DeviceActivationPlan>,
    pub engine: RenderEngine,
}

/// Mutable renderer state owned by one worker session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    caps: HostCapabilities,
    host_cores: usize,
    catalog: SceneCatalog,
    active_scene: String,
    settings: RenderSettings,
    device_config: Option<DeviceConfig>,
}

impl SessionContext {
    pub fn new(
        caps: HostCapabilities,
        host_cores: usize,
        catalog: SceneCatalog,
        settings: RenderSettings,
    ) -> Self {
        Self {
            caps,
            host_cores,
            catalog,
            active_scene: settings.scene.clone(),
            settings,
            device_config: None,
        }
    }

    pub fn from_inspection(
        caps: HostCapabilities,
        host_cores: usize,
        report: &InspectionReport,
    ) -> Self {
        Self::new(
            caps,
            host_cores,
            SceneCatalog::from_inspection(report),
            RenderSettings::from_inspection(report),
        )
    }

    pub fn capabilities(&self) -> &HostCapabilities {
        &self.caps
    }

    pub fn active_scene(&self) -> &str {
        &self.active_scene
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn device_config(&self) -> Option<&DeviceConfig> {
        self.device_config.as_ref()
    }

    /// Apply `job` for `frame` to the renderer settings.
    ///
    /// Devices are resolved and enumerated on the first call only; later
    /// frames re-apply the stored decision. A failure leaves the device
    /// settings untouched and the next call retries the selection.
    pub fn apply<E: DeviceEnumerator + ?Sized>(
        &mut self,
        job: &JobDescriptor,
        frame: FrameClaim,
        devices: &E,
    ) -> Result<(), CoreError> {
        self.switch_scene(job)?;

        let s = &mut self.settings;
        s.file_format = job.output_format().to_string();

        s.threads_mode = ThreadsMode::Fixed;
        s.threads = self.host_cores.max(job.core_count);

        if self.caps.tile_size {
            s.tile = Some(job.tile_size());
        } else {
            tracing::debug!("Host does not support tile size, ignored");
        }

        s.use_border = true;
        s.crop_to_border = job.crop;
        if !job.crop {
            s.film_transparent = true;
        }
        s.border = job.border;

        if let Some(camera) = job.camera_name() {
            if self.catalog.has_object(&self.active_scene, camera) {
                s.camera = Some(camera.to_string());
            } else {
                tracing::warn!(camera, scene = %self.active_scene, "Camera not found, keeping scene camera");
            }
        }

        s.resolution_x = job.width;
        s.resolution_y = job.height;
        s.resolution_percentage = RESOLUTION_PERCENTAGE;

        s.samples = job.samples;
        s.use_persistent_data = true;

        self.apply_devices(job, devices)?;

        let s = &mut self.settings;
        if let Some(fps) = job.fps_override() {
            s.fps = Some(fps);
        }

        s.frame = frame;
        s.filepath = frame_output_path(&job.output_directory, frame);
        Ok(())
    }

    fn switch_scene(&mut self, job: &JobDescriptor) -> Result<(), CoreError> {
        let Some(scene) = job.scene_name() else {
            return Ok(());
        };
        if scene == self.active_scene {
            return Ok(());
        }
        if !self.catalog.contains(scene) {
            return Err(CoreError::UnknownScene(scene.to_string()));
        }

        tracing::info!(scene, "Rendering specified scene");
        self.active_scene = scene.to_string();
        // Camera and frame rate belong to the previous scene; the new
        // scene's own values apply unless the job overrides them.
        self.settings.scene = scene.to_string();
        self.settings.camera = None;
        self.settings.fps = None;
        Ok(())
    }

    fn apply_devices<E: DeviceEnumerator + ?Sized>(
        &mut self,
        job: &JobDescriptor,
        devices: &E,
    ) -> Result<(), CoreError> {
        let config = match self.device_config.take() {
            Some(config) => config,
            None => self.resolve_devices(job, devices)?,
        };

        let s = &mut self.settings;
        if let Some(plan) = &config.plan {
            s.compute_device_type = Some(plan.family);
            s.devices = plan.devices.clone();
        }
        if let Some(mode) = config.resolution.device_mode() {
            s.device_mode = Some(mode);
        }
        s.engine = config.engine;

        self.device_config = Some(config);
        Ok(())
    }

    fn resolve_devices<E: DeviceEnumerator + ?Sized>(
        &self,
        job: &JobDescriptor,
        devices: &E,
    ) -> Result<DeviceConfig, CoreError> {
        let selection = EngineSelection::from_raw(job.engine);
        let resolution = resolve(job.compute_unit, selection);
        let plan = resolution
            .backend()
            .map(|request| select_devices(devices, &self.caps, request))
            .transpose()?;
        let engine = selection.render_engine(&self.caps);

        tracing::info!(
            compute_unit = job.compute_unit,
            engine = engine.as_str(),
            device_mode = ?resolution.device_mode(),
            family = ?plan.as_ref().map(|p| p.family),
            "Resolved render devices",
        );

        Ok(DeviceConfig {
            resolution,
            plan,
            engine,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

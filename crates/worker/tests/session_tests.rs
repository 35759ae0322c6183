//! Queue worker loop against in-memory coordinator, renderer and devices.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use assert_matches::assert_matches;
use async_trait::async_trait;

use farmhand_core::capabilities::{HostCapabilities, HostVersion};
use farmhand_core::compute::{BackendFamily, DeviceMode};
use farmhand_core::devices::{
    ComputeDevice, DeviceEnumerator, DeviceInventory, DeviceKind, LegacyDeviceLists,
};
use farmhand_core::error::CoreError;
use farmhand_core::job::{FrameClaim, JobDescriptor};
use farmhand_core::settings::{RenderSettings, SceneCatalog, SessionContext};
use farmhand_worker::renderer::{Renderer, RendererError};
use farmhand_worker::rpc::{Coordinator, RpcError};
use farmhand_worker::session::{QueueWorker, WorkerError, WorkerState};
use farmhand_worker::status::StatusReporter;

const TOKEN: i64 = 1;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeCoordinator {
    job: Mutex<Option<Result<JobDescriptor, RpcError>>>,
    frames: Mutex<VecDeque<FrameClaim>>,
    next_frame_calls: Mutex<usize>,
    tokens: Mutex<Vec<i64>>,
}

impl FakeCoordinator {
    fn new(job: Result<JobDescriptor, RpcError>, frames: &[FrameClaim]) -> Self {
        Self {
            job: Mutex::new(Some(job)),
            frames: Mutex::new(frames.iter().copied().collect()),
            next_frame_calls: Mutex::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    fn next_frame_calls(&self) -> usize {
        *self.next_frame_calls.lock().unwrap()
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn fetch_job(&self, token: i64) -> Result<JobDescriptor, RpcError> {
        self.tokens.lock().unwrap().push(token);
        self.job
            .lock()
            .unwrap()
            .take()
            .expect("fetch_job called more than once")
    }

    async fn next_frame(&self, token: i64) -> Result<FrameClaim, RpcError> {
        self.tokens.lock().unwrap().push(token);
        *self.next_frame_calls.lock().unwrap() += 1;
        self.frames
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RpcError::Fault {
                code: 1,
                message: "No frames left".into(),
            })
    }
}

#[derive(Default)]
struct FakeRenderer {
    fail_on: Option<FrameClaim>,
    rendered: Mutex<Vec<RenderSettings>>,
}

impl FakeRenderer {
    fn failing_on(frame: FrameClaim) -> Self {
        Self {
            fail_on: Some(frame),
            ..Default::default()
        }
    }

    fn frames(&self) -> Vec<FrameClaim> {
        self.rendered.lock().unwrap().iter().map(|s| s.frame).collect()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, settings: &RenderSettings) -> Result<(), RendererError> {
        self.rendered.lock().unwrap().push(settings.clone());
        if self.fail_on == Some(settings.frame) {
            return Err(RendererError::RenderFailed {
                exit_code: 134,
                error_line: Some("Error: Out of GPU memory".into()),
                stderr: "Aborted (core dumped)".into(),
            });
        }
        Ok(())
    }
}

struct FakeDevices {
    per_family: HashMap<BackendFamily, Vec<ComputeDevice>>,
    queries: Mutex<usize>,
}

impl FakeDevices {
    fn cuda_workstation() -> Self {
        let gpu = ComputeDevice {
            id: "GPU-0".into(),
            name: "RTX A6000".into(),
            kind: DeviceKind::Cuda,
        };
        let cpu = ComputeDevice {
            id: "CPU".into(),
            name: "Threadripper".into(),
            kind: DeviceKind::Cpu,
        };
        Self {
            per_family: HashMap::from([(BackendFamily::Cuda, vec![gpu, cpu])]),
            queries: Mutex::new(0),
        }
    }
}

impl DeviceEnumerator for FakeDevices {
    fn legacy_devices(&self) -> LegacyDeviceLists {
        LegacyDeviceLists::default()
    }

    fn devices_for_family(&self, family: BackendFamily) -> Vec<ComputeDevice> {
        *self.queries.lock().unwrap() += 1;
        self.per_family.get(&family).cloned().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn job(overrides: serde_json::Value) -> JobDescriptor {
    let mut value = serde_json::json!({
        "TaskID": "task-42",
        "Output": "/renders/task-42",
        "Scene": "",
        "Camera": "",
        "Cores": 4,
        "ComputeUnit": 3,
        "FPS": 0,
        "Border": { "X": 0.0, "X2": 1.0, "Y": 0.0, "Y2": 1.0 },
        "TileWidth": 256,
        "TileHeight": 256,
        "Samples": 128,
        "Width": 1920,
        "Height": 1080,
        "Engine": 0,
        "RenderFormat": "PNG",
        "Crop": false
    });
    if let (Some(base), Some(extra)) = (value.as_object_mut(), overrides.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(value).unwrap()
}

fn context() -> SessionContext {
    let caps = HostCapabilities::from_version(HostVersion::new(4, 1, 0));
    let catalog = SceneCatalog::new(
        vec!["Scene".into(), "Night".into()],
        HashMap::from([
            ("Scene".to_string(), vec!["Camera".to_string()]),
            ("Night".to_string(), vec!["NightCam".to_string()]),
        ]),
    );
    let settings = RenderSettings {
        scene: "Scene".into(),
        ..Default::default()
    };
    SessionContext::new(caps, 8, catalog, settings)
}

struct Outcome {
    result: Result<u64, WorkerError>,
    state: WorkerState,
    lines: Vec<String>,
}

async fn run<D: DeviceEnumerator>(
    coordinator: &FakeCoordinator,
    renderer: &FakeRenderer,
    devices: &D,
) -> Outcome {
    let mut ctx = context();
    let mut reporter = StatusReporter::new(Vec::new());
    let mut worker = QueueWorker::new(coordinator, renderer, devices, TOKEN);
    assert_eq!(worker.state(), WorkerState::Connecting);
    assert!(!worker.state().is_terminal());

    let result = worker
        .run(&mut ctx, &mut reporter)
        .await
        .map(|summary| summary.frames_rendered);

    // Every session ends in Done or Failed, whatever happened.
    assert!(worker.state().is_terminal());

    let out = String::from_utf8(reporter.into_inner()).unwrap();
    Outcome {
        result,
        state: worker.state(),
        lines: out.lines().map(str::to_string).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn renders_every_claimed_frame_then_completes() {
    let coordinator = FakeCoordinator::new(Ok(job(serde_json::json!({}))), &[1, 2, 3]);
    let renderer = FakeRenderer::default();
    let devices = FakeDevices::cuda_workstation();

    let outcome = run(&coordinator, &renderer, &devices).await;

    assert_matches!(outcome.result, Ok(3));
    assert_eq!(outcome.state, WorkerState::Done);
    assert_eq!(
        outcome.lines,
        vec![
            "RENDER_START: task-42",
            "SUCCESS: task-42",
            "RENDER_START: task-42",
            "SUCCESS: task-42",
            "RENDER_START: task-42",
            "SUCCESS: task-42",
            "BATCH_COMPLETE",
        ]
    );
    assert_eq!(renderer.frames(), vec![1, 2, 3]);
    assert_eq!(coordinator.next_frame_calls(), 4);
    assert!(coordinator.tokens.lock().unwrap().iter().all(|t| *t == TOKEN));
}

#[tokio::test]
async fn immediate_exhaustion_reports_only_batch_complete() {
    let coordinator = FakeCoordinator::new(Ok(job(serde_json::json!({}))), &[]);
    let renderer = FakeRenderer::default();
    let devices = FakeDevices::cuda_workstation();

    let outcome = run(&coordinator, &renderer, &devices).await;

    assert_matches!(outcome.result, Ok(0));
    assert_eq!(outcome.state, WorkerState::Done);
    assert_eq!(outcome.lines, vec!["BATCH_COMPLETE"]);
    assert!(renderer.frames().is_empty());
    // Devices are selected lazily, so an empty queue never enumerates.
    assert_eq!(*devices.queries.lock().unwrap(), 0);
}

#[tokio::test]
async fn render_failure_aborts_without_claiming_more() {
    let coordinator = FakeCoordinator::new(Ok(job(serde_json::json!({}))), &[1, 2, 3, 4]);
    let renderer = FakeRenderer::failing_on(3);
    let devices = FakeDevices::cuda_workstation();

    let outcome = run(&coordinator, &renderer, &devices).await;

    assert_matches!(
        outcome.result,
        Err(WorkerError::Render(RendererError::RenderFailed { exit_code: 134, .. }))
    );
    assert_eq!(outcome.state, WorkerState::Failed);
    assert_eq!(outcome.lines.len(), 6);
    assert_eq!(
        outcome.lines[..5],
        [
            "RENDER_START: task-42",
            "SUCCESS: task-42",
            "RENDER_START: task-42",
            "SUCCESS: task-42",
            "RENDER_START: task-42",
        ]
    );
    assert!(outcome.lines[5].starts_with("EXCEPTION:Render failed"));
    assert!(outcome.lines[5].contains("Out of GPU memory"));
    // The renderer's own error line wins over the raw stderr tail.
    assert!(!outcome.lines[5].contains("core dumped"));
    assert!(!outcome.lines.iter().any(|l| l == "BATCH_COMPLETE"));
    assert_eq!(coordinator.next_frame_calls(), 3);
    assert_eq!(renderer.frames(), vec![1, 2, 3]);
}

#[tokio::test]
async fn fetch_failure_reports_exception_and_claims_nothing() {
    let coordinator = FakeCoordinator::new(
        Err(RpcError::Fault {
            code: -32603,
            message: "no job for token".into(),
        }),
        &[1, 2],
    );
    let renderer = FakeRenderer::default();
    let devices = FakeDevices::cuda_workstation();

    let outcome = run(&coordinator, &renderer, &devices).await;

    assert_matches!(outcome.result, Err(WorkerError::Transport(RpcError::Fault { .. })));
    assert_eq!(outcome.state, WorkerState::Failed);
    assert_eq!(outcome.lines.len(), 1);
    assert!(outcome.lines[0].starts_with("EXCEPTION:"));
    assert!(outcome.lines[0].contains("no job for token"));
    assert_eq!(coordinator.next_frame_calls(), 0);
}

#[tokio::test]
async fn unknown_scene_fails_before_render_start() {
    let coordinator = FakeCoordinator::new(Ok(job(serde_json::json!({ "Scene": "Dusk" }))), &[1]);
    let renderer = FakeRenderer::default();
    let devices = FakeDevices::cuda_workstation();

    let outcome = run(&coordinator, &renderer, &devices).await;

    assert_matches!(
        outcome.result,
        Err(WorkerError::Core(CoreError::UnknownScene(ref scene))) if scene == "Dusk"
    );
    assert_eq!(outcome.lines, vec!["EXCEPTION:Unknown scene: Dusk"]);
    assert!(renderer.frames().is_empty());
}

#[tokio::test]
async fn missing_backend_devices_fail_the_session() {
    // Unit 5: HIP, per the compute unit table.
    let coordinator = FakeCoordinator::new(Ok(job(serde_json::json!({ "ComputeUnit": 5 }))), &[1]);
    let renderer = FakeRenderer::default();
    let devices = FakeDevices::cuda_workstation();

    let outcome = run(&coordinator, &renderer, &devices).await;

    assert_matches!(
        outcome.result,
        Err(WorkerError::Core(CoreError::NoDevicesFound {
            family: BackendFamily::Hip
        }))
    );
    assert_eq!(outcome.lines.len(), 1);
    assert_eq!(
        outcome.lines[0],
        "EXCEPTION:No devices found for type HIP, unsupported hardware or platform?"
    );
}

#[tokio::test]
async fn reported_hip_devices_render_on_amd_host() {
    let coordinator = FakeCoordinator::new(Ok(job(serde_json::json!({ "ComputeUnit": 5 }))), &[1]);
    let renderer = FakeRenderer::default();
    let devices = DeviceInventory {
        families: HashMap::from([(
            BackendFamily::Hip,
            vec![
                ComputeDevice {
                    id: "HIP-0".into(),
                    name: "Radeon PRO W7900".into(),
                    kind: DeviceKind::Hip,
                },
                ComputeDevice {
                    id: "CPU".into(),
                    name: "EPYC".into(),
                    kind: DeviceKind::Cpu,
                },
            ],
        )]),
        ..Default::default()
    };

    let outcome = run(&coordinator, &renderer, &devices).await;

    assert_matches!(outcome.result, Ok(1));
    let rendered = renderer.rendered.lock().unwrap();
    assert_eq!(rendered[0].compute_device_type, Some(BackendFamily::Hip));
    let enabled: Vec<_> = rendered[0]
        .devices
        .iter()
        .filter(|d| d.enabled)
        .map(|d| d.device.id.as_str())
        .collect();
    assert_eq!(enabled, vec!["HIP-0"]);
}

#[tokio::test]
async fn settings_reach_the_renderer_per_frame() {
    let coordinator = FakeCoordinator::new(
        Ok(job(serde_json::json!({
            "Scene": "Night",
            "Camera": "NightCam",
            "Cores": 16,
            "FPS": 30,
            "RenderFormat": "OPEN_EXR"
        }))),
        &[7, 120],
    );
    let renderer = FakeRenderer::default();
    let devices = FakeDevices::cuda_workstation();

    let outcome = run(&coordinator, &renderer, &devices).await;
    assert_matches!(outcome.result, Ok(2));

    let rendered = renderer.rendered.lock().unwrap();
    assert_eq!(rendered[0].filepath, "/renders/task-42/00007");
    assert_eq!(rendered[1].filepath, "/renders/task-42/00120");

    let first = &rendered[0];
    assert_eq!(first.scene, "Night");
    assert_eq!(first.camera.as_deref(), Some("NightCam"));
    assert_eq!(first.file_format, "OPEN_EXR");
    assert_eq!(first.threads, 16);
    assert_eq!(first.fps, Some(30.0));
    assert_eq!(first.compute_device_type, Some(BackendFamily::Cuda));
    assert_eq!(first.device_mode, Some(DeviceMode::Gpu));
    assert!(first.devices.iter().all(|d| d.enabled != d.device.is_cpu()));

    // Device selection happens once per session.
    assert_eq!(*devices.queries.lock().unwrap(), 1);
    assert_eq!(rendered[1].devices, first.devices);
}

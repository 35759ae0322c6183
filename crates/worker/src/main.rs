//! `farmhand-worker` -- render farm queue worker.
//!
//! Fetches one job from the coordinator, claims frames until the queue
//! closes, renders each through the external renderer, and reports
//! progress to its supervisor as status lines on stdout. Logs go to
//! stderr. See [`farmhand_worker::config`] for environment variables.
//!
//! Exits with status 1 after reporting `EXCEPTION:`.

use farmhand_core::capabilities::HostCapabilities;
use farmhand_core::devices::DeviceInventory;
use farmhand_core::settings::SessionContext;
use farmhand_worker::config::WorkerConfig;
use farmhand_worker::gpu::{unlisted_gpus, NvmlGpus};
use farmhand_worker::renderer::ProcessRenderer;
use farmhand_worker::rpc::JsonRpcCoordinator;
use farmhand_worker::session::{report_exception, QueueWorker, WorkerError};
use farmhand_worker::status::StatusReporter;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Everything a session needs, prepared before the first coordinator call.
struct Bootstrap {
    config: WorkerConfig,
    renderer: ProcessRenderer,
    coordinator: JsonRpcCoordinator,
    ctx: SessionContext,
    devices: DeviceInventory,
}

async fn bootstrap() -> Result<Bootstrap, WorkerError> {
    let config = WorkerConfig::from_env()?;

    tracing::info!(
        coordinator = %config.coordinator_url,
        token = config.worker_token,
        renderer = %config.renderer_bin.display(),
        project = %config.project_file.display(),
        "Starting farmhand-worker",
    );

    let renderer = ProcessRenderer::new(&config.renderer_bin, &config.project_file)
        .with_args(&config.renderer_args);

    let version = match config.renderer_version {
        Some(version) => version,
        None => renderer.detect_version().await?,
    };
    let caps = HostCapabilities::from_version(version);
    tracing::info!(
        %version,
        legacy_devices = caps.legacy_device_enumeration,
        tile_size = caps.tile_size,
        "Host capabilities",
    );

    let report = renderer.inspect().await?;
    if let Some(floor) = report.version_floor().filter(|floor| *floor > version) {
        tracing::warn!(%floor, %version, "Project was saved by a newer renderer");
    }

    let host_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let ctx = SessionContext::from_inspection(caps, host_cores, &report);

    let devices = renderer.devices().await?;
    let gpus = NvmlGpus::new();
    let unlisted = unlisted_gpus(gpus.count(), &devices);
    if unlisted > 0 {
        tracing::warn!(
            unlisted,
            nvml_gpus = ?gpus.names(),
            "Renderer lists fewer CUDA devices than the driver reports"
        );
    }

    let coordinator = JsonRpcCoordinator::connect(&config.coordinator_url)?;
    tracing::info!(
        endpoint = %coordinator.endpoint(),
        host = %ctx.capabilities().version,
        "Worker ready"
    );

    Ok(Bootstrap {
        config,
        renderer,
        coordinator,
        ctx,
        devices,
    })
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "farmhand_worker=info,farmhand_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut reporter = StatusReporter::stdout();

    let Bootstrap {
        config,
        renderer,
        coordinator,
        mut ctx,
        devices,
    } = match bootstrap().await {
        Ok(ready) => ready,
        Err(err) => {
            report_exception(&mut reporter, &err);
            std::process::exit(1);
        }
    };

    let mut worker = QueueWorker::new(&coordinator, &renderer, &devices, config.worker_token);
    if worker.run(&mut ctx, &mut reporter).await.is_err() {
        std::process::exit(1);
    }
}

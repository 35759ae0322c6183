//! Queue worker loop.
//!
//! One session fetches the job descriptor once, then claims frames until
//! the coordinator's `next_frame` call fails. Every failure of
//! `next_frame` is treated as queue exhaustion. Any other failure (fetch,
//! settings, render) aborts the session: the top-level handler emits a
//! single `EXCEPTION:` line and no further frames are claimed.
//!
//! ```text
//! Connecting -> FetchingJob -> Idle <-> Rendering
//!                    |          |          |
//!                    v          v          v
//!                 Failed      Done       Failed
//! ```

use std::fmt;
use std::io::Write;

use farmhand_core::devices::DeviceEnumerator;
use farmhand_core::error::CoreError;
use farmhand_core::settings::SessionContext;

use crate::config::ConfigError;
use crate::renderer::{Renderer, RendererError};
use crate::rpc::{Coordinator, RpcError};
use crate::status::{StatusEvent, StatusReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    FetchingJob,
    Idle,
    Rendering,
    Done,
    Failed,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::FetchingJob => "fetching_job",
            Self::Idle => "idle",
            Self::Rendering => "rendering",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Anything that ends a worker session abnormally.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Coordinator error: {0}")]
    Transport(#[from] RpcError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Render(#[from] RendererError),

    #[error("Failed to write status line: {0}")]
    Status(#[from] std::io::Error),
}

/// Outcome of a session that reached `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_rendered: u64,
}

/// Drives one session against a coordinator, a renderer and the host's
/// devices.
pub struct QueueWorker<'a, C: ?Sized, R: ?Sized, D: ?Sized> {
    coordinator: &'a C,
    renderer: &'a R,
    devices: &'a D,
    token: i64,
    state: WorkerState,
}

impl<'a, C, R, D> QueueWorker<'a, C, R, D>
where
    C: Coordinator + ?Sized,
    R: Renderer + ?Sized,
    D: DeviceEnumerator + ?Sized,
{
    pub fn new(coordinator: &'a C, renderer: &'a R, devices: &'a D, token: i64) -> Self {
        Self {
            coordinator,
            renderer,
            devices,
            token,
            state: WorkerState::Connecting,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run the session to a terminal state.
    ///
    /// On success `BATCH_COMPLETE` has been reported. On failure the error
    /// has been reported as `EXCEPTION:` and is returned for the exit code.
    pub async fn run<W: Write>(
        &mut self,
        ctx: &mut SessionContext,
        reporter: &mut StatusReporter<W>,
    ) -> Result<SessionSummary, WorkerError> {
        let result = match self.render_queue(ctx, reporter).await {
            Ok(summary) => reporter
                .report(&StatusEvent::BatchComplete)
                .map(|()| summary)
                .map_err(WorkerError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(summary) => {
                self.transition(WorkerState::Done);
                tracing::info!(frames = summary.frames_rendered, "Batch complete");
                Ok(summary)
            }
            Err(err) => {
                self.transition(WorkerState::Failed);
                report_exception(reporter, &err);
                Err(err)
            }
        }
    }

    async fn render_queue<W: Write>(
        &mut self,
        ctx: &mut SessionContext,
        reporter: &mut StatusReporter<W>,
    ) -> Result<SessionSummary, WorkerError> {
        self.transition(WorkerState::FetchingJob);
        let job = self.coordinator.fetch_job(self.token).await?;
        tracing::info!(
            task_id = %job.task_id,
            compute_unit = job.compute_unit,
            engine = job.engine,
            output = %job.output_directory,
            "Job fetched",
        );
        self.transition(WorkerState::Idle);

        let mut frames_rendered = 0;
        loop {
            let frame = match self.coordinator.next_frame(self.token).await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::info!(reason = %e, "Frame queue closed");
                    break;
                }
            };

            self.transition(WorkerState::Rendering);
            ctx.apply(&job, frame, self.devices)?;

            tracing::info!(frame, filepath = %ctx.settings().filepath, "Rendering frame");
            reporter.report(&StatusEvent::RenderStart(&job.task_id))?;
            self.renderer.render(ctx.settings()).await?;
            reporter.report(&StatusEvent::Success(&job.task_id))?;

            frames_rendered += 1;
            self.transition(WorkerState::Idle);
        }

        Ok(SessionSummary { frames_rendered })
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!(from = %self.state, to = %next, "Worker state");
        self.state = next;
    }
}

/// Report `err` as the session's single `EXCEPTION:` line.
///
/// A failure to write it is only logged; there is nowhere left to report.
pub fn report_exception<W: Write>(reporter: &mut StatusReporter<W>, err: &WorkerError) {
    tracing::error!(error = %err, "Worker session failed");
    if let Err(e) = reporter.report(&StatusEvent::Exception(err.to_string())) {
        tracing::error!(error = %e, "Failed to report exception");
    }
}

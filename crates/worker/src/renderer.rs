//! External renderer process.
//!
//! The renderer is a separate executable driven through four
//! subcommands:
//!
//! | Invocation                     | Contract                                              |
//! |--------------------------------|-------------------------------------------------------|
//! | `<bin> --version`              | prints a version string, e.g. `Blender 4.1.1`         |
//! | `<bin> inspect <project>`      | prints one JSON inspection record or `EXCEPTION:...`  |
//! | `<bin> devices`                | prints one JSON [`DeviceInventory`] or `EXCEPTION:...`|
//! | `<bin> render <project>`       | reads [`RenderSettings`] JSON on stdin, exit 0 = done |
//!
//! Render stdout is parsed for progress, the saved path and `Error:` lines
//! (see [`crate::output`]). Renders have no timeout.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use farmhand_core::capabilities::HostVersion;
use farmhand_core::devices::DeviceInventory;
use farmhand_core::inspection::{
    parse_inspection_output, parse_record, InspectionError, InspectionReport,
};
use farmhand_core::settings::RenderSettings;

use crate::output::RenderTranscript;

/// Stderr retained from a failed render (64 KiB).
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Characters of stderr kept in a [`RendererError::RenderFailed`] message.
const STDERR_TAIL_CHARS: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("Failed to launch renderer {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Renderer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Render failed (exit code {exit_code}): {}", failure_detail(.error_line, .stderr))]
    RenderFailed {
        exit_code: i32,
        /// Last `Error:` line the renderer printed on stdout.
        error_line: Option<String>,
        stderr: String,
    },

    #[error("Could not determine renderer version from output: {0:?}")]
    UnknownVersion(String),

    #[error(transparent)]
    Inspection(#[from] InspectionError),

    #[error("Failed to encode render settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Executes one frame render with fully applied settings.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, settings: &RenderSettings) -> Result<(), RendererError>;
}

/// Renderer driven as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRenderer {
    program: PathBuf,
    /// Arguments placed before the subcommand, e.g. a bridge script.
    leading_args: Vec<OsString>,
    project: PathBuf,
}

impl ProcessRenderer {
    pub fn new(program: impl Into<PathBuf>, project: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            project: project.into(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> RendererError {
        RendererError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }

    /// Ask the renderer for its version.
    pub async fn detect_version(&self) -> Result<HostVersion, RendererError> {
        let output = self
            .command()
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout
            .lines()
            .find_map(HostVersion::parse)
            .ok_or_else(|| RendererError::UnknownVersion(stdout.trim().to_string()))?;

        tracing::info!(%version, program = %self.program.display(), "Renderer version");
        Ok(version)
    }

    /// Open the project read-only and read back its inspection record.
    pub async fn inspect(&self) -> Result<InspectionReport, RendererError> {
        let output = self
            .command()
            .arg("inspect")
            .arg(&self.project)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            tracing::warn!(
                exit_code = output.status.code().unwrap_or(-1),
                "Inspection exited unsuccessfully"
            );
        }

        let report = parse_inspection_output(&String::from_utf8_lossy(&output.stdout))?;
        tracing::info!(
            scenes = report.scenes.len(),
            cameras = report.cameras.len(),
            frames = report.frame_count(),
            "Project inspected"
        );
        Ok(report)
    }

    /// Ask the renderer which compute devices it can see, per family.
    pub async fn devices(&self) -> Result<DeviceInventory, RendererError> {
        let output = self
            .command()
            .arg("devices")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            tracing::warn!(
                exit_code = output.status.code().unwrap_or(-1),
                "Device listing exited unsuccessfully"
            );
        }

        let inventory: DeviceInventory = parse_record(&String::from_utf8_lossy(&output.stdout))?;
        for (family, devices) in &inventory.families {
            tracing::info!(%family, count = devices.len(), "Renderer devices");
        }
        tracing::info!(
            legacy_cuda = inventory.legacy.cuda.len(),
            legacy_opencl = inventory.legacy.opencl.len(),
            accelerators = inventory
                .families
                .keys()
                .map(|family| inventory.accelerator_count(*family))
                .sum::<usize>(),
            "Device inventory read"
        );
        Ok(inventory)
    }
}

#[async_trait]
impl Renderer for ProcessRenderer {
    async fn render(&self, settings: &RenderSettings) -> Result<(), RendererError> {
        let payload = serde_json::to_vec(settings)?;

        let mut child = self
            .command()
            .arg("render")
            .arg(&self.project)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        if let Some(mut stdin) = child.stdin.take() {
            // The renderer may close stdin early; its exit status decides.
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::warn!(error = %e, "Renderer closed stdin early");
            }
            drop(stdin);
        }

        // The worker's own stdout is reserved for status lines.
        let stdout_task = tokio::spawn(watch_output(child.stdout.take()));
        let stderr_task = tokio::spawn(read_tail(child.stderr.take()));

        let status = child.wait().await?;

        let transcript = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            tracing::info!(
                frame = settings.frame,
                saved = ?transcript.saved,
                warnings = transcript.warnings,
                "Renderer exited cleanly"
            );
            return Ok(());
        }

        Err(RendererError::RenderFailed {
            exit_code: status.code().unwrap_or(-1),
            error_line: transcript.last_error,
            stderr: tail(&String::from_utf8_lossy(&stderr), STDERR_TAIL_CHARS),
        })
    }
}

/// Prefer the renderer's own error line, then its stderr.
fn failure_detail<'a>(error_line: &'a Option<String>, stderr: &'a str) -> &'a str {
    match error_line {
        Some(line) => line,
        None if stderr.is_empty() => "no error output",
        None => stderr,
    }
}

/// Drain render stdout line by line into a [`RenderTranscript`].
async fn watch_output<R: AsyncRead + Unpin>(handle: Option<R>) -> RenderTranscript {
    let mut transcript = RenderTranscript::default();
    let Some(stream) = handle else {
        return transcript;
    };
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => transcript.observe(&String::from_utf8_lossy(&line)),
        }
    }
    transcript
}

/// Drain a stream, keeping only its last [`MAX_STDERR_BYTES`].
async fn read_tail<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut stream) = handle else {
        return buf;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > MAX_STDERR_BYTES {
                    let excess = buf.len() - MAX_STDERR_BYTES;
                    buf.drain(..excess);
                }
            }
        }
    }
    buf
}

fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

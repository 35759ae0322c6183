//! Renderer stdout parsing.
//!
//! The renderer narrates a frame on stdout. Lines that matter:
//!
//! | Line                                               | Parsed as                      |
//! |----------------------------------------------------|--------------------------------|
//! | `Fra:1 Mem:12.00M \| Rendering 12 / 64 samples`    | progress, 18.75%               |
//! | `Fra:1 Mem:12.00M \| Sample 12/64`                 | progress, 18.75%               |
//! | `Fra:1 Mem:12.00M \| Synchronizing object \| Cube` | log, last `\|` segment only    |
//! | `Saved: '/renders/00001.png'`                      | saved output path              |
//! | `Warning: ...`                                     | warning                        |
//! | `Error: ...`                                       | error, reported on failure     |
//!
//! Anything else is logged at debug level.

use std::path::PathBuf;

const FRAME_MARKER: &str = "Fra:";
const SAVED_MARKER: &str = "Saved:";
const WARNING_MARKER: &str = "Warning:";
const ERROR_MARKER: &str = "Error:";

/// One classified line of renderer output.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutput {
    Progress { status: String, percent: Option<f32> },
    Saved(PathBuf),
    Warning(String),
    Error(String),
    Log(String),
}

impl RenderOutput {
    /// Classify a line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let parsed = if line.contains(FRAME_MARKER) {
            let status = line.rsplit('|').next().map_or(line, str::trim);
            if status.starts_with("Rendering") || status.starts_with("Sample") {
                Self::Progress {
                    status: status.to_string(),
                    percent: progress_percent(status),
                }
            } else {
                Self::Log(status.to_string())
            }
        } else if let Some(rest) = line.split_once(SAVED_MARKER).map(|(_, rest)| rest) {
            // The path is quoted; older hosts print it bare.
            let path = rest.split('\'').nth(1).unwrap_or(rest).trim();
            Self::Saved(PathBuf::from(path))
        } else if line.contains(WARNING_MARKER) {
            Self::Warning(line.to_string())
        } else if line.contains(ERROR_MARKER) {
            Self::Error(line.to_string())
        } else {
            Self::Log(line.to_string())
        };
        Some(parsed)
    }
}

/// Percentage from `Rendering n / m ...` or `Sample n/m`.
fn progress_percent(status: &str) -> Option<f32> {
    let (_, counts) = status.split_once(char::is_whitespace)?;
    let (current, total) = counts.split_once('/')?;
    let current: f32 = current.trim().parse().ok()?;
    let total: f32 = total.split_whitespace().next()?.parse().ok()?;
    (total > 0.0).then(|| current / total * 100.0)
}

/// What one render said about itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderTranscript {
    /// Last path the renderer reported saving.
    pub saved: Option<PathBuf>,
    /// Last `Error:` line.
    pub last_error: Option<String>,
    pub warnings: usize,
}

impl RenderTranscript {
    /// Record and log one line of renderer output.
    pub fn observe(&mut self, line: &str) {
        match RenderOutput::parse(line) {
            Some(RenderOutput::Progress { status, percent }) => {
                tracing::info!(target: "renderer", percent = ?percent, "{status}");
            }
            Some(RenderOutput::Saved(path)) => {
                tracing::info!(target: "renderer", path = %path.display(), "Saved");
                self.saved = Some(path);
            }
            Some(RenderOutput::Warning(message)) => {
                tracing::warn!(target: "renderer", "{message}");
                self.warnings += 1;
            }
            Some(RenderOutput::Error(message)) => {
                tracing::error!(target: "renderer", "{message}");
                self.last_error = Some(message);
            }
            Some(RenderOutput::Log(message)) => {
                tracing::debug!(target: "renderer", "{message}");
            }
            None => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

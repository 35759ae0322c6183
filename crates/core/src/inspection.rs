//! Project inspection record.
//!
//! The inspection utility opens the project read-only and prints a single
//! line describing it (scenes, cameras, resolution, frame range, ...), or
//! an `EXCEPTION:` line when it cannot. The worker uses the record to seed
//! its scene catalog and initial render settings.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::capabilities::HostVersion;

/// Prefix the inspection utility uses to report a failure.
pub const EXCEPTION_PREFIX: &str = "EXCEPTION:";

#[derive(Debug, thiserror::Error)]
pub enum InspectionError {
    #[error("Renderer utility failed: {0}")]
    Exception(String),

    #[error("Renderer utility produced no output")]
    Empty,

    #[error("Malformed renderer record: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectionReport {
    /// Oldest host version able to open the project, e.g. `"4.1.0"`.
    pub last_version: String,
    pub render_width: u32,
    pub render_height: u32,
    pub frame_start: i64,
    pub frame_end: i64,
    #[serde(rename = "FPS")]
    pub fps: f64,
    pub denoiser: String,
    pub samples: u32,
    pub cameras: Vec<String>,
    pub selected_camera: String,
    pub scenes: Vec<String>,
    pub selected_scene: String,
    /// Object names per scene. Older inspection utilities do not report it.
    #[serde(default)]
    pub scene_objects: HashMap<String, Vec<String>>,
}

impl InspectionReport {
    pub fn version_floor(&self) -> Option<HostVersion> {
        HostVersion::parse(&self.last_version)
    }

    /// Number of frames in the project's frame range (inclusive). Inverted
    /// ranges count zero; ranges wider than `u64` saturate.
    pub fn frame_count(&self) -> u64 {
        let span = i128::from(self.frame_end) - i128::from(self.frame_start) + 1;
        u64::try_from(span.max(0)).unwrap_or(u64::MAX)
    }
}

/// Parse the inspection utility's stdout.
///
/// The first non-empty line is the record. Anything the host printed
/// before it is expected to have been cleared, so leading blank lines are
/// skipped but other noise is not.
pub fn parse_inspection_output(stdout: &str) -> Result<InspectionReport, InspectionError> {
    parse_record(stdout)
}

/// Parse a single-line JSON record printed by one of the renderer's
/// utility subcommands, with the same blank-line and `EXCEPTION:` rules as
/// [`parse_inspection_output`].
pub fn parse_record<T: DeserializeOwned>(stdout: &str) -> Result<T, InspectionError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(InspectionError::Empty)?;

    if let Some(message) = line.strip_prefix(EXCEPTION_PREFIX) {
        return Err(InspectionError::Exception(message.trim().to_string()));
    }

    Ok(serde_json::from_str(line)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

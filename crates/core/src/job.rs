//! Job descriptor received from the coordinator.
//!
//! The descriptor is fetched once per worker session and is read-only
//! afterwards. Field names follow the coordinator's PascalCase wire format.
//! Only structural validation happens here (serde): out-of-range values are
//! passed through and surface later as render-time failures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Image format used when the descriptor does not name one.
pub const DEFAULT_OUTPUT_FORMAT: &str = "PNG";

/// Number of digits the frame index is zero-padded to in output paths.
pub const FRAME_PAD_WIDTH: usize = 5;

/// A single frame index claimed from the coordinator's queue.
pub type FrameClaim = i64;

/// Task identifier used to correlate status lines. The coordinator may
/// send either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Number(i64),
    Text(String),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Normalised render region, each edge in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Border {
    #[serde(rename = "X")]
    pub min_x: f32,
    #[serde(rename = "X2")]
    pub max_x: f32,
    #[serde(rename = "Y")]
    pub min_y: f32,
    #[serde(rename = "Y2")]
    pub max_y: f32,
}

impl Default for Border {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            max_x: 1.0,
            min_y: 0.0,
            max_y: 1.0,
        }
    }
}

/// Render tile dimensions. Only honoured by hosts that still support tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSize {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobDescriptor {
    #[serde(rename = "TaskID")]
    pub task_id: TaskId,
    /// Directory each frame is written into.
    #[serde(rename = "Output")]
    pub output_directory: String,
    /// Target scene; empty or absent means the currently active scene.
    #[serde(default)]
    pub scene: Option<String>,
    #[serde(default)]
    pub camera: Option<String>,
    #[serde(rename = "Cores")]
    pub core_count: usize,
    pub compute_unit: i32,
    #[serde(rename = "FPS", default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub border: Border,
    #[serde(default)]
    pub tile_width: i32,
    #[serde(default)]
    pub tile_height: i32,
    /// Passed to the renderer as given; the renderer clamps or rejects.
    pub samples: i64,
    pub width: i64,
    pub height: i64,
    pub engine: i32,
    #[serde(rename = "RenderFormat", default)]
    pub output_format: Option<String>,
    pub crop: bool,
}

impl JobDescriptor {
    /// Scene named by the descriptor, treating an empty string as absent.
    pub fn scene_name(&self) -> Option<&str> {
        self.scene.as_deref().filter(|s| !s.is_empty())
    }

    pub fn camera_name(&self) -> Option<&str> {
        self.camera.as_deref().filter(|s| !s.is_empty())
    }

    /// Output image format, falling back to [`DEFAULT_OUTPUT_FORMAT`].
    pub fn output_format(&self) -> &str {
        self.output_format
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_OUTPUT_FORMAT)
    }

    pub fn tile_size(&self) -> TileSize {
        TileSize {
            width: self.tile_width,
            height: self.tile_height,
        }
    }

    /// Frame rate override, if one was requested.
    pub fn fps_override(&self) -> Option<f64> {
        self.fps.filter(|fps| *fps > 0.0)
    }
}

/// Build the output path for `frame`: `{output_directory}/{frame:05}`.
pub fn frame_output_path(output_directory: &str, frame: FrameClaim) -> String {
    format!("{output_directory}/{frame:0width$}", width = FRAME_PAD_WIDTH)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Worker configuration loaded from environment variables.
//!
//! | Variable           | Required | Default                 | Description                                   |
//! |--------------------|----------|-------------------------|-----------------------------------------------|
//! | `COORDINATOR_URL`  | no       | `http://localhost:8081` | JSON-RPC endpoint of the job coordinator      |
//! | `WORKER_TOKEN`     | no       | `1`                     | Integer token passed on every coordinator call|
//! | `RENDERER_BIN`     | yes      | --                      | Renderer executable                           |
//! | `RENDERER_ARGS`    | no       | --                      | Whitespace-separated args before the subcommand |
//! | `PROJECT_FILE`     | yes      | --                      | Project the worker renders                    |
//! | `RENDERER_VERSION` | no       | detected                | Skip the `--version` query, e.g. `4.1.1`      |

use std::path::PathBuf;

use farmhand_core::capabilities::HostVersion;

pub const DEFAULT_COORDINATOR_URL: &str = "http://localhost:8081";
pub const DEFAULT_WORKER_TOKEN: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub coordinator_url: String,
    pub worker_token: i64,
    pub renderer_bin: PathBuf,
    pub renderer_args: Vec<String>,
    pub project_file: PathBuf,
    /// `None` means ask the renderer.
    pub renderer_version: Option<HostVersion>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let coordinator_url =
            var("COORDINATOR_URL").unwrap_or_else(|| DEFAULT_COORDINATOR_URL.into());

        let worker_token = match var("WORKER_TOKEN") {
            Some(value) => value.trim().parse::<i64>().map_err(|_| ConfigError::Invalid {
                name: "WORKER_TOKEN",
                expected: "a valid integer",
                value,
            })?,
            None => DEFAULT_WORKER_TOKEN,
        };

        let renderer_bin = var("RENDERER_BIN")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("RENDERER_BIN"))?;

        let renderer_args = var("RENDERER_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let project_file = var("PROJECT_FILE")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("PROJECT_FILE"))?;

        let renderer_version = match var("RENDERER_VERSION") {
            Some(value) => Some(HostVersion::parse(&value).ok_or(ConfigError::Invalid {
                name: "RENDERER_VERSION",
                expected: "a version like 4.1.1",
                value,
            })?),
            None => None,
        };

        Ok(Self {
            coordinator_url,
            worker_token,
            renderer_bin,
            renderer_args,
            project_file,
            renderer_version,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Host capability flags.
//!
//! The rendering host changed behaviour across releases: device
//! enumeration moved from a combined list to per-family queries, tile
//! sizes were dropped, and the realtime engine got a new identifier.
//! These differences are computed once from the host version at session
//! start instead of comparing versions at every call site.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::compute::RenderEngine;

/// Release that introduced per-family device queries and dropped tiles.
const PER_FAMILY_DEVICES_SINCE: HostVersion = HostVersion::new(3, 0, 0);

/// Release that renamed the realtime engine identifier.
const REALTIME_NEXT_SINCE: HostVersion = HostVersion::new(4, 2, 0);

/// First `major.minor[.patch]` token in free-form text.
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?<major>\d+)\.(?<minor>\d+)(?:\.(?<patch>\d+))?").expect("valid regex")
});

/// Semantic version of the rendering host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl HostVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Find the first `major.minor[.patch]` token in `text`.
    ///
    /// Works on raw `--version` output (`"Renderer 4.1.1\n  build date: ..."`)
    /// as well as on a bare `"3.6"`. A missing patch component is `0`.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(text)?;
        let major = caps["major"].parse().ok()?;
        let minor = caps["minor"].parse().ok()?;
        let patch = match caps.name("patch") {
            Some(p) => p.as_str().parse().ok()?,
            None => 0,
        };
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Behaviour switches derived from the host version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    pub version: HostVersion,
    /// Devices come from one combined list instead of per-family queries.
    pub legacy_device_enumeration: bool,
    /// The host still accepts explicit render tile sizes.
    pub tile_size: bool,
    /// Identifier used when the realtime engine is selected.
    pub realtime_engine: RenderEngine,
}

impl HostCapabilities {
    pub fn from_version(version: HostVersion) -> Self {
        let legacy = version < PER_FAMILY_DEVICES_SINCE;
        let realtime_engine = if version < REALTIME_NEXT_SINCE {
            RenderEngine::Eevee
        } else {
            RenderEngine::EeveeNext
        };

        Self {
            version,
            legacy_device_enumeration: legacy,
            tile_size: legacy,
            realtime_engine,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Scan configuration resolved from the environment.

use std::time::Duration;

use crate::scheduler::DEFAULT_FPS;
use crate::types::{CaptureConstraints, Facing};

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// Tunables for a scan session.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub constraints: CaptureConstraints,
    pub fps: u32,
    pub verify_latency: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            constraints: CaptureConstraints::default(),
            fps: DEFAULT_FPS,
            verify_latency: Duration::ZERO,
        }
    }
}

impl ScanConfig {
    /// Read `SUPPLY_SCAN_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let facing = match lookup("SUPPLY_SCAN_FACING")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("user") | Some("front") => Facing::User,
            Some("environment") | Some("back") | None => Facing::Environment,
            Some(other) => {
                tracing::warn!("Unknown SUPPLY_SCAN_FACING '{other}', using environment");
                Facing::Environment
            }
        };

        Self {
            constraints: CaptureConstraints {
                facing,
                ideal_width: read_u32(&lookup, "SUPPLY_SCAN_WIDTH", DEFAULT_WIDTH).max(1),
                ideal_height: read_u32(&lookup, "SUPPLY_SCAN_HEIGHT", DEFAULT_HEIGHT).max(1),
            },
            fps: read_u32(&lookup, "SUPPLY_SCAN_FPS", DEFAULT_FPS).max(1),
            verify_latency: Duration::from_millis(read_u64(
                &lookup,
                "SUPPLY_SCAN_VERIFY_LATENCY_MS",
                0,
            )),
        }
    }

    /// Interval between decode iterations.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

fn read_u32(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u32) -> u32 {
    read_u64(lookup, name, default as u64).min(u32::MAX as u64) as u32
}

fn read_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    match lookup(name) {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Invalid {name} value '{raw}': {e}; using {default}");
                default
            }
        },
        None => default,
    }
}

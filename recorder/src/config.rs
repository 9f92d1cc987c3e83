use anyhow::{bail, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::log_writer::Backpressure;

// ── Default constants ───────────────────────────────────────────────────

/// Shared detection log, the one file both processes agree on.
pub const DEFAULT_LOG_PATH: &str = "/log/log.txt";

/// Inference config handed to nvinfer.
const DEFAULT_PGIE_CONFIG: &str = "config.txt";

const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_ENQUEUE_TIMEOUT_MS: u64 = 250;
const DEFAULT_LOG_MAX_BYTES: u64 = 67_108_864;
const DEFAULT_LOG_KEEP_FILES: usize = 5;

// ── Config struct ───────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub log_path: PathBuf,
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
    pub backpressure: Backpressure,
    /// Rotation threshold; 0 keeps the whole run in one file.
    pub log_max_bytes: u64,
    pub log_keep_files: usize,
    pub track_bbox: bool,
    pub overlay: bool,
    /// Frame metadata bridge; stdin when unset.
    pub frame_input: Option<PathBuf>,
    pub pgie_config: PathBuf,
}

impl RecorderConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = dirs::home_dir();
        let home = home.as_deref();

        let backpressure = match lookup("ARGUS_BACKPRESSURE").as_deref().map(str::trim) {
            None | Some("") | Some("block") => Backpressure::Block,
            Some("drop") => Backpressure::DropNewest,
            Some(other) => bail!("ARGUS_BACKPRESSURE must be `block` or `drop`, got {other:?}"),
        };

        let queue_capacity = env_usize(&lookup, "ARGUS_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            bail!("ARGUS_QUEUE_CAPACITY must be at least 1");
        }

        Ok(Self {
            log_path: env_path(&lookup, "ARGUS_LOG_PATH", PathBuf::from(DEFAULT_LOG_PATH), home),
            queue_capacity,
            enqueue_timeout: Duration::from_millis(env_u64(
                &lookup,
                "ARGUS_ENQUEUE_TIMEOUT_MS",
                DEFAULT_ENQUEUE_TIMEOUT_MS,
            )),
            backpressure,
            log_max_bytes: env_u64(&lookup, "ARGUS_LOG_MAX_BYTES", DEFAULT_LOG_MAX_BYTES),
            log_keep_files: env_usize(&lookup, "ARGUS_LOG_KEEP_FILES", DEFAULT_LOG_KEEP_FILES),
            track_bbox: env_bool(&lookup, "ARGUS_TRACK_BBOX", false),
            overlay: env_bool(&lookup, "ARGUS_OVERLAY", true),
            frame_input: lookup("ARGUS_FRAME_INPUT")
                .filter(|v| !v.trim().is_empty())
                .map(|v| expand_tilde(&v, home)),
            pgie_config: env_path(
                &lookup,
                "ARGUS_PGIE_CONFIG",
                PathBuf::from(DEFAULT_PGIE_CONFIG),
                home,
            ),
        })
    }
}

// ── Shared helpers ──────────────────────────────────────────────────────

pub fn env_path(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: PathBuf,
    home: Option<&Path>,
) -> PathBuf {
    match lookup(key) {
        Some(val) if !val.trim().is_empty() => expand_tilde(&val, home),
        _ => default,
    }
}

pub fn env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key) {
        Some(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

pub fn env_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    match lookup(key) {
        Some(val) => val.trim().parse::<u64>().unwrap_or(default),
        None => default,
    }
}

pub fn env_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    match lookup(key) {
        Some(val) => val.trim().parse::<usize>().unwrap_or(default),
        None => default,
    }
}

pub fn expand_tilde(input: &str, home: Option<&Path>) -> PathBuf {
    if let (Some(rest), Some(home)) = (input.strip_prefix("~/"), home) {
        return home.join(rest);
    }
    PathBuf::from(input)
}

use crate::log_index::{discover_archives, name_parts};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct RotationResult {
    /// Where the full log went, if it was moved aside.
    pub archive_path: Option<PathBuf>,
    pub pruned: usize,
}

impl RotationResult {
    pub fn rotated(&self) -> bool {
        self.archive_path.is_some()
    }
}

/// Moves `log_path` aside once it exceeds `max_bytes` and keeps at most
/// `keep_files` archives. `max_bytes == 0` disables rotation.
pub fn rotate_if_needed(
    log_path: &Path,
    max_bytes: u64,
    keep_files: usize,
) -> Result<RotationResult> {
    if max_bytes == 0 || !over_threshold(log_path, max_bytes)? {
        return Ok(RotationResult::default());
    }

    let archive = next_archive_path(log_path)?;
    fs::rename(log_path, &archive)
        .with_context(|| format!("failed to archive {} as {}", log_path.display(), archive.display()))?;
    File::create(log_path)
        .with_context(|| format!("failed to start a fresh log at {}", log_path.display()))?;

    let pruned = prune_archives(log_path, keep_files)?;
    Ok(RotationResult {
        archive_path: Some(archive),
        pruned,
    })
}

fn over_threshold(log_path: &Path, max_bytes: u64) -> Result<bool> {
    match fs::metadata(log_path) {
        Ok(meta) => Ok(meta.len() > max_bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to stat {}", log_path.display())),
    }
}

/// Deletes the oldest archives so that at most `keep_files` (and at least one) remain.
fn prune_archives(log_path: &Path, keep_files: usize) -> Result<usize> {
    let archives = discover_archives(log_path)?;
    let excess = archives.len().saturating_sub(keep_files.max(1));
    for stale in &archives[..excess] {
        fs::remove_file(stale)
            .with_context(|| format!("failed to prune archive {}", stale.display()))?;
    }
    Ok(excess)
}

fn next_archive_path(log_path: &Path) -> Result<PathBuf> {
    let dir = log_path.parent().unwrap_or(Path::new("."));
    let (stem, ext) = name_parts(log_path);
    // Stamps sort lexicographically; retry until the clock moves past an existing one.
    for _ in 0..1_000 {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let name = match &ext {
            Some(ext) => format!("{stem}.{timestamp}.{ext}"),
            None => format!("{stem}.{timestamp}"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
        std::thread::yield_now();
    }
    bail!("could not pick a free archive name next to {}", log_path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn full_log_is_archived_and_oldest_archive_pruned() {
        let dir = tempdir().expect("tempdir");
        let log_path = dir.path().join("log.txt");
        fs::write(&log_path, "0123456789").expect("write log");
        fs::write(dir.path().join("log.20240101T000000.000000Z.txt"), "a").expect("write a1");
        fs::write(dir.path().join("log.20240201T000000.000000Z.txt"), "b").expect("write a2");

        let res = rotate_if_needed(&log_path, 5, 2).expect("rotate");
        assert!(res.rotated());
        assert!(log_path.exists());
        assert_eq!(fs::metadata(&log_path).expect("meta").len(), 0);
        assert_eq!(res.pruned, 1);

        let archives = discover_archives(&log_path).expect("discover");
        assert_eq!(archives.len(), 2);
        assert!(!archives[0].ends_with("log.20240101T000000.000000Z.txt"));
        let moved = res.archive_path.expect("archive path");
        assert_eq!(fs::read_to_string(moved).expect("read archive"), "0123456789");
    }

    #[test]
    fn small_file_is_left_alone() {
        let dir = tempdir().expect("tempdir");
        let log_path = dir.path().join("log.txt");
        fs::write(&log_path, "0123").expect("write log");

        let res = rotate_if_needed(&log_path, 5, 2).expect("rotate");
        assert!(!res.rotated());
        assert_eq!(fs::read_to_string(&log_path).expect("read"), "0123");
    }

    #[test]
    fn zero_threshold_disables_rotation() {
        let dir = tempdir().expect("tempdir");
        let log_path = dir.path().join("log.txt");
        fs::write(&log_path, "0123456789").expect("write log");

        let res = rotate_if_needed(&log_path, 0, 2).expect("rotate");
        assert!(!res.rotated());
        assert!(discover_archives(&log_path).expect("discover").is_empty());
    }

    #[test]
    fn back_to_back_rotations_get_distinct_archives() {
        let dir = tempdir().expect("tempdir");
        let log_path = dir.path().join("log.txt");
        for _ in 0..3 {
            fs::write(&log_path, "0123456789").expect("write log");
            assert!(rotate_if_needed(&log_path, 5, 10).expect("rotate").rotated());
        }
        assert_eq!(discover_archives(&log_path).expect("discover").len(), 3);
    }

    #[test]
    fn missing_log_is_not_rotated() {
        let dir = tempdir().expect("tempdir");
        let log_path = dir.path().join("log.txt");
        let res = rotate_if_needed(&log_path, 5, 2).expect("rotate");
        assert!(!res.rotated());
        assert!(!log_path.exists());
    }
}

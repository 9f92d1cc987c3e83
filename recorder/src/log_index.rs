use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// File name parts of a log path: `detections.txt` splits into `("detections", Some("txt"))`.
pub(crate) fn name_parts(log_path: &Path) -> (String, Option<String>) {
    let stem = log_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("log")
        .to_string();
    let ext = log_path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_string);
    (stem, ext)
}

fn is_archive_name(name: &str, log_path: &Path) -> bool {
    let current = log_path.file_name().and_then(|n| n.to_str());
    if Some(name) == current {
        return false;
    }
    let (stem, ext) = name_parts(log_path);
    let Some(rest) = name.strip_prefix(&format!("{stem}.")) else {
        return false;
    };
    let middle = match &ext {
        Some(ext) => rest.strip_suffix(&format!(".{ext}")),
        None => Some(rest),
    };
    // Archive stamps look like 20250314T092653.589793Z.
    middle.is_some_and(|m| m.len() > 1 && m.ends_with('Z') && m.contains('T'))
}

/// Rotated archives of `log_path`, oldest first.
pub fn discover_archives(log_path: &Path) -> Result<Vec<PathBuf>> {
    let Some(dir) = log_path.parent() else {
        return Ok(Vec::new());
    };
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut archives = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_archive_name(name, log_path) {
            archives.push(path);
        }
    }

    archives.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    Ok(archives)
}

/// Archives followed by the live file, if it exists.
pub fn discover_logs(log_path: &Path) -> Result<Vec<PathBuf>> {
    let mut files = discover_archives(log_path)?;
    if log_path.is_file() {
        files.push(log_path.to_path_buf());
    }
    Ok(files)
}

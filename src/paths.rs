// src/paths.rs

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, warn};

use crate::{
    error::{PipelineError, Result},
    retry::{retry_blocking, RetryPolicy},
};

/// `YY/MM/DD/HH/MM` for `now`, every segment zero-padded to two digits so
/// lexical order matches chronological order.
pub fn minute_segments<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    format!(
        "{:02}/{:02}/{:02}/{:02}/{:02}",
        now.year().rem_euclid(100),
        now.month(),
        now.day(),
        now.hour(),
        now.minute()
    )
}

/// `root/YY/MM/DD/HH/MM[/file_name]`. Two calls within the same minute give
/// the same path. Nothing is created on disk.
pub fn destination_path<Tz: TimeZone>(
    root: impl AsRef<Path>,
    now: &DateTime<Tz>,
    file_name: Option<&str>,
) -> PathBuf {
    let mut path = root.as_ref().to_path_buf();
    for seg in minute_segments(now).split('/') {
        path.push(seg);
    }
    if let Some(name) = file_name {
        path.push(name);
    }
    path
}

/// Create `dir` and its parents if absent, retrying transient failures.
pub fn ensure_dir(dir: &Path, policy: RetryPolicy) -> Result<()> {
    retry_blocking(policy, "create_dir_all", |_| {
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))
    })?;
    debug!(dir = %dir.display(), "directory ready");
    Ok(())
}

/// Create the parent directory of `file` if it has one.
pub fn ensure_parent(file: &Path, policy: RetryPolicy) -> Result<()> {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent, policy),
        _ => Ok(()),
    }
}

/// Most recently modified `*.csv` anywhere below `dir`.
pub fn latest_csv(dir: &Path) -> Result<PathBuf> {
    let pattern = format!("{}/**/*.csv", dir.display());
    let entries = glob(&pattern).map_err(|e| {
        PipelineError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
        )
    })?;

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(path = %e.path().display(), error = %e.error(), "skipping unreadable entry");
                continue;
            }
        };
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| PipelineError::io(&path, e))?;
        if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
            latest = Some((modified, path));
        }
    }

    latest.map(|(_, p)| p).ok_or_else(|| {
        PipelineError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no CSV files found"),
        )
    })
}

//! Disk retention for the upload tree.
//!
//! Files older than the retention window are deleted. Empty directories are
//! removed only once they have been untouched for a day, so today's directory
//! is never removed before the camera's first upload lands in it.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

const EMPTY_DIR_MIN_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub errors: usize,
}

/// Sweeps `base` bottom-up. `base` itself is never removed.
pub fn sweep(base: &Path, retention: Duration, now: SystemTime) -> SweepSummary {
    let mut summary = SweepSummary::default();
    let Some(cutoff) = now.checked_sub(retention) else {
        return summary;
    };
    sweep_dir(base, base, cutoff, now, &mut summary);
    if summary.files_removed > 0 || summary.dirs_removed > 0 {
        log::info!(
            "retention sweep removed {} file(s) and {} empty director(ies)",
            summary.files_removed,
            summary.dirs_removed
        );
    }
    summary
}

fn sweep_dir(base: &Path, dir: &Path, cutoff: SystemTime, now: SystemTime, summary: &mut SweepSummary) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::error!("retention sweep cannot read {}: {}", dir.display(), e);
            summary.errors += 1;
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                log::error!("retention sweep cannot stat {}: {}", path.display(), e);
                summary.errors += 1;
                continue;
            }
        };
        if file_type.is_dir() {
            sweep_dir(base, &path, cutoff, now, summary);
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .map(|modified| modified < cutoff);
        match expired {
            Ok(true) => match fs::remove_file(&path) {
                Ok(()) => {
                    log::info!("purged old file {}", path.display());
                    summary.files_removed += 1;
                }
                Err(e) => {
                    log::error!("failed to purge {}: {}", path.display(), e);
                    summary.errors += 1;
                }
            },
            Ok(false) => {}
            Err(e) => {
                log::error!("retention sweep cannot stat {}: {}", path.display(), e);
                summary.errors += 1;
            }
        }
    }

    if dir == base {
        return;
    }
    let is_empty = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if !is_empty {
        return;
    }
    let idle_for = fs::metadata(dir)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok());
    if idle_for.map_or(false, |age| age > EMPTY_DIR_MIN_AGE) {
        match fs::remove_dir(dir) {
            Ok(()) => {
                log::info!("purged empty directory {}", dir.display());
                summary.dirs_removed += 1;
            }
            Err(e) => {
                log::error!("failed to remove {}: {}", dir.display(), e);
                summary.errors += 1;
            }
        }
    }
}

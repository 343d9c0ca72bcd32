//! Upload directory resolution.
//!
//! The uploader writes clips to `root/YYYY/MM/DD/`. Watched directories are
//! recomputed from the local date on every tick so midnight rollover needs no
//! restart.

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CLIP_EXTENSION: &str = "mp4";

/// Directory for `date` under `root`.
pub fn day_path(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(date.format("%Y/%m/%d").to_string())
}

/// Directories to scan at local time `now`: today's, plus yesterday's while
/// still inside the rollover grace window. Today comes first.
pub fn watch_dirs(root: &Path, now: NaiveDateTime, grace: Duration) -> Vec<PathBuf> {
    let today = now.date();
    let mut dirs = vec![day_path(root, today)];
    let since_midnight = Duration::from_secs(u64::from(now.time().num_seconds_from_midnight()));
    if since_midnight < grace {
        if let Some(yesterday) = today.pred_opt() {
            dirs.push(day_path(root, yesterday));
        }
    }
    dirs
}

/// Candidate clips in `dir`, sorted by path. A missing directory is simply
/// empty: the camera creates today's directory on its first upload.
pub fn list_clips(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut clips = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        if is_clip(&path) {
            clips.push(path);
        }
    }
    clips.sort();
    Ok(clips)
}

pub fn is_clip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(CLIP_EXTENSION))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(hh, mm, 0))
            .expect("valid timestamp")
    }

    #[test]
    fn day_path_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).expect("date");
        assert_eq!(
            day_path(Path::new("/srv/cam"), date),
            PathBuf::from("/srv/cam/2026/01/05")
        );
    }

    #[test]
    fn previous_day_is_watched_only_inside_grace() {
        let root = Path::new("/srv/cam");
        let grace = Duration::from_secs(300);

        let just_after = watch_dirs(root, at(2026, 3, 1, 0, 2), grace);
        assert_eq!(
            just_after,
            vec![
                PathBuf::from("/srv/cam/2026/03/01"),
                PathBuf::from("/srv/cam/2026/02/28"),
            ]
        );

        let later = watch_dirs(root, at(2026, 3, 1, 0, 10), grace);
        assert_eq!(later, vec![PathBuf::from("/srv/cam/2026/03/01")]);
    }

    #[test]
    fn lists_only_mp4_files() -> Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("b.mp4"), b"x")?;
        fs::write(temp.path().join("a.MP4"), b"x")?;
        fs::write(temp.path().join("a.jpg"), b"x")?;
        fs::create_dir(temp.path().join("nested.mp4"))?;

        let clips = list_clips(temp.path())?;
        assert_eq!(
            clips,
            vec![temp.path().join("a.MP4"), temp.path().join("b.mp4")]
        );
        Ok(())
    }

    #[test]
    fn missing_directory_lists_nothing() -> Result<()> {
        let temp = tempfile::tempdir()?;
        assert!(list_clips(&temp.path().join("2026/01/10"))?.is_empty());
        Ok(())
    }
}

//! Ownership and permission normalization for uploaded files.
//!
//! FTP servers often leave uploads owned by the transfer user with a
//! restrictive umask. When enabled, each ready clip is chowned/chmodded before
//! it is handed to the composer. Every failure here is logged and absorbed;
//! the only outcome that affects playback is a clip that cannot be opened.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::path::Path;

use crate::config::PermissionSettings;

/// Parses `644`, `0644` or `0o644` as an octal mode.
pub fn parse_octal_mode(raw: &str) -> Option<u32> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw.is_empty() {
        return None;
    }
    let digits = raw.strip_prefix("0o").unwrap_or(&raw);
    u32::from_str_radix(digits, 8).ok()
}

/// Resolves `user:group` (names or numeric ids, either part optional).
pub fn resolve_user_group(user_group: &str) -> Result<(Option<u32>, Option<u32>)> {
    let user_group = user_group.trim();
    if user_group.is_empty() {
        return Ok((None, None));
    }
    let (user, group) = match user_group.split_once(':') {
        Some((user, group)) => (user.trim(), group.trim()),
        None => (user_group, ""),
    };
    let uid = if user.is_empty() {
        None
    } else {
        Some(match user.parse::<u32>() {
            Ok(uid) => uid,
            Err(_) => lookup_user(user)?,
        })
    };
    let gid = if group.is_empty() {
        None
    } else {
        Some(match group.parse::<u32>() {
            Ok(gid) => gid,
            Err(_) => lookup_group(group)?,
        })
    };
    Ok((uid, gid))
}

#[cfg(unix)]
fn lookup_user(name: &str) -> Result<u32> {
    let cname = std::ffi::CString::new(name).map_err(|_| anyhow!("invalid user name"))?;
    // SAFETY: cname is NUL-terminated; the returned record is read before any
    // other passwd call on this thread.
    let entry = unsafe { libc::getpwnam(cname.as_ptr()) };
    if entry.is_null() {
        return Err(anyhow!("unknown user {:?}", name));
    }
    Ok(unsafe { (*entry).pw_uid })
}

#[cfg(unix)]
fn lookup_group(name: &str) -> Result<u32> {
    let cname = std::ffi::CString::new(name).map_err(|_| anyhow!("invalid group name"))?;
    // SAFETY: as in lookup_user.
    let entry = unsafe { libc::getgrnam(cname.as_ptr()) };
    if entry.is_null() {
        return Err(anyhow!("unknown group {:?}", name));
    }
    Ok(unsafe { (*entry).gr_gid })
}

#[cfg(not(unix))]
fn lookup_user(name: &str) -> Result<u32> {
    Err(anyhow!("user names are not supported on this platform: {:?}", name))
}

#[cfg(not(unix))]
fn lookup_group(name: &str) -> Result<u32> {
    Err(anyhow!("group names are not supported on this platform: {:?}", name))
}

/// Whether a clip may be played after fixups ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixupOutcome {
    Readable,
    Unreadable,
}

/// Resolved permission policy.
#[derive(Clone, Debug, Default)]
pub struct PermissionFixup {
    enabled: bool,
    uid: Option<u32>,
    gid: Option<u32>,
    file_mode: Option<u32>,
    dir_mode: Option<u32>,
}

impl PermissionFixup {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Builds the policy. An unresolvable owner disables chown but keeps chmod.
    pub fn from_settings(settings: &PermissionSettings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }
        let (uid, gid) = match resolve_user_group(&settings.user_group) {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("failed to resolve user_group for permission fixups: {}", e);
                (None, None)
            }
        };
        Self {
            enabled: true,
            uid,
            gid,
            file_mode: settings.file_mode,
            dir_mode: settings.dir_mode,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Normalizes a ready clip and checks that it can still be opened.
    pub fn prepare_clip(&self, path: &Path) -> FixupOutcome {
        self.apply(path, false);
        match File::open(path) {
            Ok(_) => FixupOutcome::Readable,
            Err(e) => {
                log::warn!("skipping unreadable clip {}: {}", path.display(), e);
                FixupOutcome::Unreadable
            }
        }
    }

    /// Normalizes a day directory.
    pub fn prepare_dir(&self, path: &Path) {
        self.apply(path, true);
    }

    fn apply(&self, path: &Path, is_dir: bool) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.chown(path) {
            log::error!("failed to chown {}: {}", path.display(), e);
        }
        let mode = if is_dir { self.dir_mode } else { self.file_mode };
        if let Some(mode) = mode {
            match set_mode_if_needed(path, mode) {
                Ok(Some(previous)) => log::info!(
                    "fixed permissions on {} from {:o} to {:o}",
                    path.display(),
                    previous,
                    mode
                ),
                Ok(None) => {}
                Err(e) => log::error!("failed to chmod {}: {}", path.display(), e),
            }
        }
    }

    #[cfg(unix)]
    fn chown(&self, path: &Path) -> std::io::Result<()> {
        if self.uid.is_none() && self.gid.is_none() {
            return Ok(());
        }
        std::os::unix::fs::chown(path, self.uid, self.gid)
    }

    #[cfg(not(unix))]
    fn chown(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

/// Applies `mode` when it differs; returns the previous mode if changed.
#[cfg(unix)]
fn set_mode_if_needed(path: &Path, mode: u32) -> std::io::Result<Option<u32>> {
    use std::os::unix::fs::PermissionsExt;

    let current = std::fs::metadata(path)?.permissions().mode() & 0o7777;
    if current == mode {
        return Ok(None);
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(Some(current))
}

#[cfg(not(unix))]
fn set_mode_if_needed(_path: &Path, _mode: u32) -> std::io::Result<Option<u32>> {
    Ok(None)
}

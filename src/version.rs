//! Build version bookkeeping
//!
//! Keeps a one-line `VERSION` file in the install root synchronized with
//! the string reported by `git describe --always --dirty`. The file is the
//! fallback when the tree is deployed without its git metadata; a read-only
//! install (permission denied on write) is tolerated.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context};
use tracing::{debug, warn};

/// Name of the version file inside the install root.
pub const VERSION_FILE: &str = "VERSION";

/// Resolve the current version string and keep the `VERSION` file in
/// `install_root` up to date with it.
pub fn sync_version_file(install_root: &Path) -> anyhow::Result<String> {
    let path = install_root.join(VERSION_FILE);
    let recorded = match std::fs::read_to_string(&path) {
        Ok(raw) => Some(raw.trim().to_string()),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    match git_describe(install_root) {
        Some(live) => {
            if recorded.as_deref() != Some(live.as_str()) {
                match std::fs::write(&path, &live) {
                    Ok(()) => debug!(version = %live, "updated VERSION file"),
                    Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                        warn!(%err, "VERSION file is not writable; continuing");
                    }
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("failed to write {}", path.display()));
                    }
                }
            }
            Ok(live)
        }
        None => match recorded {
            Some(version) if !version.is_empty() => Ok(version),
            _ => bail!("no version available: git describe failed and no VERSION file"),
        },
    }
}

fn git_describe(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty"])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8(output.stdout).ok()?.trim().to_string();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}

//! Cgroup directory computation, membership and removal.
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::unistd::Pid;

use crate::common::{self, WrapIoResult, WrappedIoError, CGROUP_PROCS};
use crate::subsystem::Subsystem;

const JOIN_UNDO_BACKOFF: Duration = Duration::from_millis(10);

/// Outcome of removing a cgroup directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Nothing to remove.
    Missing,
    /// The directory is still in use by tasks or child cgroups and was left in place.
    Populated,
}

/// Computes `root/subsystem/init_path/hierarchy_path`.
///
/// `init_path` is usually absolute as read from `/proc/self/cgroup`; only its
/// normal components are appended so the result always stays below `root`.
pub fn directory_for(
    root: &Path,
    subsystem: Subsystem,
    init_path: &Path,
    hierarchy_path: &Path,
) -> PathBuf {
    let mut path = root.join(subsystem.as_ref());
    push_normal(&mut path, init_path);
    push_normal(&mut path, hierarchy_path);
    path
}

fn push_normal(path: &mut PathBuf, relative: &Path) {
    for component in relative.components() {
        if let Component::Normal(c) = component {
            path.push(c);
        }
    }
}

/// The first directory on the way from `home` down to `cgroup_path` that does
/// not exist yet. Creating `cgroup_path` creates it and everything below it.
pub fn first_missing_dir(home: &Path, cgroup_path: &Path) -> Option<PathBuf> {
    let relative = cgroup_path.strip_prefix(home).ok()?;
    let mut current = home.to_path_buf();
    for component in relative.components() {
        current.push(component);
        if !current.exists() {
            return Some(current);
        }
    }
    None
}

/// Removes the now empty ancestors of `cgroup_path` up to and including
/// `created_from`. Stops at the first one that is still in use.
pub fn remove_created_parents(cgroup_path: &Path, created_from: &Path) {
    for ancestor in cgroup_path.ancestors().skip(1) {
        if !ancestor.starts_with(created_from) {
            break;
        }
        if let Err(err) = common::delete_with_retry(ancestor, 1, Duration::ZERO) {
            tracing::debug!("keeping {}: {}", ancestor.display(), err);
            break;
        }
    }
}

/// Creates `cgroup_path` if needed and writes `pid` into its `cgroup.procs`.
pub fn ensure_joined(cgroup_path: &Path, pid: Pid) -> Result<(), WrappedIoError> {
    ensure_joined_with(cgroup_path, pid, |_| Ok(()))
}

/// Like [`ensure_joined`], running `prepare` between directory creation and the
/// pid write. A leaf directory created by this call is removed again when
/// joining fails.
pub fn ensure_joined_with<F>(cgroup_path: &Path, pid: Pid, prepare: F) -> Result<(), WrappedIoError>
where
    F: FnOnce(&Path) -> Result<(), WrappedIoError>,
{
    let created = !cgroup_path.exists();
    // create_dir_all tolerates a concurrent creation of the same path
    fs::create_dir_all(cgroup_path).wrap_create_dir(cgroup_path)?;

    let joined = prepare(cgroup_path)
        .and_then(|_| common::write_cgroup_file(cgroup_path.join(CGROUP_PROCS), pid));

    if let Err(err) = joined {
        if created {
            if let Err(remove_err) = remove_cgroup_dir(cgroup_path, 1, JOIN_UNDO_BACKOFF) {
                tracing::warn!(
                    "failed to remove {} after unsuccessful join: {}",
                    cgroup_path.display(),
                    remove_err
                );
            }
        }
        return Err(err);
    }

    Ok(())
}

/// Removes a cgroup directory together with its child cgroups, deepest first.
///
/// cgroupfs only allows rmdir on cgroup directories, control files vanish with
/// them. Directories that still hold tasks or child cgroups are reported as
/// [`Removal::Populated`] instead of failing.
pub fn remove_cgroup_dir(
    cgroup_path: &Path,
    retries: u32,
    limit_backoff: Duration,
) -> Result<Removal, WrappedIoError> {
    match fs::symlink_metadata(cgroup_path) {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Removal::Missing),
        Err(err) => return Err(err).wrap_other(cgroup_path),
    }

    for entry in fs::read_dir(cgroup_path).wrap_read(cgroup_path)? {
        let entry = entry.wrap_read(cgroup_path)?;
        if entry.file_type().wrap_read(entry.path())?.is_dir() {
            remove_cgroup_dir(&entry.path(), retries, limit_backoff)?;
        }
    }

    match common::delete_with_retry(cgroup_path, retries, limit_backoff) {
        Ok(()) => Ok(Removal::Removed),
        Err(err) if err.inner().raw_os_error() == Some(Errno::EBUSY as i32) => {
            Ok(Removal::Populated)
        }
        Err(err) if err.inner().raw_os_error() == Some(Errno::ENOTEMPTY as i32) => {
            if has_child_dirs(cgroup_path)? {
                return Ok(Removal::Populated);
            }
            // not a cgroupfs mount, the remaining entries are plain files
            fs::remove_dir_all(cgroup_path).wrap_remove(cgroup_path)?;
            Ok(Removal::Removed)
        }
        Err(err) => Err(err),
    }
}

fn has_child_dirs(path: &Path) -> Result<bool, WrappedIoError> {
    for entry in fs::read_dir(path).wrap_read(path)? {
        let entry = entry.wrap_read(path)?;
        if entry.file_type().wrap_read(entry.path())?.is_dir() {
            return Ok(true);
        }
    }
    Ok(false)
}

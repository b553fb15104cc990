//! The record of a successful apply and everything needed to undo it.
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::unistd::Pid;

use crate::common::{self, WrappedIoError, CGROUP_PROCS};
use crate::config::CgroupConfig;
use crate::path::{self, Removal};
use crate::spec::{FreezerState, ResourceSpec};
use crate::subsystem::freezer::{Freezer, FreezerError};
use crate::subsystem::Subsystem;

/// A subsystem the process was joined to and the directory it was joined in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinedSubsystem {
    pub subsystem: Subsystem,
    pub path: PathBuf,
    /// The cgroup the process was in before, `root/subsystem/init_path`.
    pub(crate) home: PathBuf,
    /// Topmost directory between `home` and `path` that the join created.
    pub(crate) created_from: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
#[error("failed to remove {subsystem} cgroup {path}: {err}")]
pub struct CleanupFailure {
    pub subsystem: Subsystem,
    pub path: PathBuf,
    #[source]
    pub err: WrappedIoError,
}

/// Every directory that could not be removed. Removal continues past a
/// failure, so this lists all of them.
#[derive(thiserror::Error, Debug)]
#[error("failed to remove cgroup directories: {}", FailureList(.failures))]
pub struct CleanupError {
    pub failures: Vec<CleanupFailure>,
}

struct FailureList<'a>(&'a [CleanupFailure]);

impl Display for FailureList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl CleanupError {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.failures.iter().map(|f| f.path.as_path())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FreezeError {
    #[error("freezer subsystem was not joined")]
    NotJoined,
    #[error(transparent)]
    Freezer(#[from] FreezerError),
}

/// Removes the directories of `joined`, last joined first. A failure for one
/// subsystem does not stop the removal of the others. Directories that are
/// still populated are left in place with a warning.
pub(crate) fn remove_joined(
    joined: &[JoinedSubsystem],
    retries: u32,
    limit_backoff: Duration,
) -> Result<(), CleanupError> {
    remove_each(joined, retries, limit_backoff, false)
}

/// Undoes a partial apply. `pid` is moved back to its home cgroup in every
/// joined subsystem first, since cgroupfs refuses to remove a cgroup with
/// member tasks. Anything left behind, populated directories included, is a
/// failure. Parent directories the joins created are removed as well.
pub(crate) fn rollback_joined(
    joined: &[JoinedSubsystem],
    pid: Pid,
    retries: u32,
    limit_backoff: Duration,
) -> Result<(), CleanupError> {
    for JoinedSubsystem { subsystem, home, .. } in joined.iter().rev() {
        // the task may have exited already, removal decides what is left
        if let Err(err) = common::write_cgroup_file(home.join(CGROUP_PROCS), pid) {
            tracing::debug!(%subsystem, %pid, "failed to move task back: {}", err);
        }
    }

    remove_each(joined, retries, limit_backoff, true)
}

fn remove_each(
    joined: &[JoinedSubsystem],
    retries: u32,
    limit_backoff: Duration,
    strict: bool,
) -> Result<(), CleanupError> {
    let mut failures = Vec::new();

    for joined_subsystem in joined.iter().rev() {
        let removal = path::remove_cgroup_dir(&joined_subsystem.path, retries, limit_backoff);
        match settle(joined_subsystem, removal, strict) {
            Some(failure) => failures.push(failure),
            None if strict => {
                if let Some(created_from) = &joined_subsystem.created_from {
                    path::remove_created_parents(&joined_subsystem.path, created_from);
                }
            }
            None => {}
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(CleanupError { failures })
    }
}

fn settle(
    joined: &JoinedSubsystem,
    removal: Result<Removal, WrappedIoError>,
    strict: bool,
) -> Option<CleanupFailure> {
    let JoinedSubsystem {
        subsystem, path, ..
    } = joined;
    let err = match removal {
        Ok(Removal::Removed) => {
            tracing::debug!(%subsystem, path = %path.display(), "removed cgroup");
            return None;
        }
        Ok(Removal::Missing) => return None,
        Ok(Removal::Populated) if !strict => {
            tracing::warn!(
                %subsystem,
                path = %path.display(),
                "cgroup is still populated and was left in place"
            );
            return None;
        }
        Ok(Removal::Populated) => WrappedIoError::Remove {
            err: io::Error::from_raw_os_error(Errno::EBUSY as i32),
            path: path.clone(),
        },
        Err(err) => err,
    };

    Some(CleanupFailure {
        subsystem: *subsystem,
        path: path.clone(),
        err,
    })
}

/// A process placed into its cgroups. Dropping the handle leaves the cgroups
/// in place, [`ActiveCgroup::cleanup`] removes them.
#[derive(Debug)]
pub struct ActiveCgroup {
    root: PathBuf,
    hierarchy_path: PathBuf,
    pid: Pid,
    spec: ResourceSpec,
    joined: Vec<JoinedSubsystem>,
    remove_retries: u32,
    remove_backoff: Duration,
}

impl ActiveCgroup {
    pub(crate) fn new(
        root: PathBuf,
        pid: Pid,
        spec: ResourceSpec,
        joined: Vec<JoinedSubsystem>,
        config: &CgroupConfig,
    ) -> Self {
        Self {
            root,
            hierarchy_path: spec.hierarchy_path(),
            pid,
            spec,
            joined,
            remove_retries: config.remove_retries,
            remove_backoff: config.remove_backoff(),
        }
    }

    /// Removes the cgroup directory of every joined subsystem. Directories
    /// that are already gone count as removed, so calling this again is fine.
    pub fn cleanup(&self) -> Result<(), CleanupError> {
        remove_joined(&self.joined, self.remove_retries, self.remove_backoff)?;
        tracing::info!(path = %self.hierarchy_path.display(), "cgroup removed");
        Ok(())
    }

    /// Freezes or thaws every task in the cgroup.
    pub fn freeze(&self, state: FreezerState) -> Result<(), FreezeError> {
        let path = self
            .subsystem_path(Subsystem::Freezer)
            .ok_or(FreezeError::NotJoined)?;
        Freezer::set_state(state, path)?;
        Ok(())
    }

    /// Pids in the cgroup and its descendants, read from the first joined
    /// subsystem since membership is the same in all of them.
    pub fn pids(&self) -> Result<Vec<Pid>, WrappedIoError> {
        match self.joined.first() {
            Some(joined) => common::get_all_pids(&joined.path),
            None => Ok(Vec::new()),
        }
    }

    /// Hierarchy path shared by all subsystems, `parent/name`.
    pub fn path(&self) -> &Path {
        &self.hierarchy_path
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    /// Joined subsystems in join order.
    pub fn joined(&self) -> Vec<Subsystem> {
        self.joined.iter().map(|j| j.subsystem).collect()
    }

    pub fn subsystem_path(&self, subsystem: Subsystem) -> Option<&Path> {
        self.joined
            .iter()
            .find(|j| j.subsystem == subsystem)
            .map(|j| j.path.as_path())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test::set_fixture;

    fn joined_in(root: &Path, subsystems: &[Subsystem]) -> Vec<JoinedSubsystem> {
        subsystems
            .iter()
            .map(|s| {
                let path = root.join(s.as_ref()).join("c1");
                fs::create_dir_all(&path).unwrap();
                set_fixture(&path, CGROUP_PROCS, "4242\n").unwrap();
                JoinedSubsystem {
                    subsystem: *s,
                    path: path.clone(),
                    home: root.join(s.as_ref()),
                    created_from: Some(path),
                }
            })
            .collect()
    }

    fn handle(root: &Path, joined: Vec<JoinedSubsystem>) -> ActiveCgroup {
        let config = CgroupConfig {
            remove_backoff_ms: 0,
            ..Default::default()
        };
        ActiveCgroup::new(
            root.to_path_buf(),
            Pid::from_raw(4242),
            ResourceSpec::new("c1"),
            joined,
            &config,
        )
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let joined = joined_in(tmp.path(), &[Subsystem::Cpu, Subsystem::Memory]);
        let handle = handle(tmp.path(), joined);

        handle.cleanup().expect("first cleanup");
        handle.cleanup().expect("second cleanup");

        assert!(!tmp.path().join("cpu").join("c1").exists());
        assert!(!tmp.path().join("memory").join("c1").exists());
    }

    #[test]
    fn test_cleanup_continues_after_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut joined = joined_in(tmp.path(), &[Subsystem::Cpu, Subsystem::Memory]);
        // a regular file where a cgroup directory is expected cannot be listed
        let bogus = tmp.path().join("devices-c1");
        fs::write(&bogus, "").unwrap();
        joined.insert(
            1,
            JoinedSubsystem {
                subsystem: Subsystem::Devices,
                path: bogus.clone(),
                home: tmp.path().to_path_buf(),
                created_from: None,
            },
        );
        let handle = handle(tmp.path(), joined);

        let err = handle.cleanup().expect_err("devices cannot be removed");

        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].subsystem, Subsystem::Devices);
        assert_eq!(err.paths().collect::<Vec<_>>(), vec![bogus.as_path()]);
        assert!(!tmp.path().join("cpu").join("c1").exists());
        assert!(!tmp.path().join("memory").join("c1").exists());
    }

    #[test]
    fn test_rollback_moves_task_home() {
        let tmp = tempfile::tempdir().unwrap();
        let joined = joined_in(tmp.path(), &[Subsystem::Memory, Subsystem::Cpu]);

        rollback_joined(&joined, Pid::from_raw(4242), 1, Duration::ZERO).expect("rollback");

        for subsystem in ["memory", "cpu"] {
            let home = tmp.path().join(subsystem);
            assert_eq!(fs::read_to_string(home.join(CGROUP_PROCS)).unwrap(), "4242");
            assert!(!home.join("c1").exists());
        }
    }

    #[test]
    fn test_rollback_removes_created_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("cpu");
        let path = home.join("users").join("c1");
        fs::create_dir_all(&path).unwrap();
        let joined = vec![JoinedSubsystem {
            subsystem: Subsystem::Cpu,
            path: path.clone(),
            home: home.clone(),
            created_from: Some(home.join("users")),
        }];

        rollback_joined(&joined, Pid::from_raw(1), 1, Duration::ZERO).expect("rollback");

        assert!(!home.join("users").exists());
        assert!(home.exists());
    }

    #[test]
    fn test_populated_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        let joined = joined_in(tmp.path(), &[Subsystem::Cpu]).remove(0);

        assert!(settle(&joined, Ok(Removal::Populated), false).is_none());

        let failure = settle(&joined, Ok(Removal::Populated), true).expect("rollback failure");
        assert_eq!(failure.subsystem, Subsystem::Cpu);
        assert_eq!(failure.path, joined.path);
        assert_eq!(failure.err.inner().raw_os_error(), Some(Errno::EBUSY as i32));
        assert!(settle(&joined, Ok(Removal::Missing), true).is_none());
    }

    #[test]
    fn test_accessors() {
        let tmp = tempfile::tempdir().unwrap();
        let joined = joined_in(tmp.path(), &[Subsystem::Devices, Subsystem::Cpu]);
        let handle = handle(tmp.path(), joined);

        assert_eq!(handle.path(), Path::new("c1"));
        assert_eq!(handle.root(), tmp.path());
        assert_eq!(handle.pid(), Pid::from_raw(4242));
        assert_eq!(handle.spec().name, "c1");
        assert_eq!(handle.joined(), vec![Subsystem::Devices, Subsystem::Cpu]);
        assert_eq!(
            handle.subsystem_path(Subsystem::Cpu),
            Some(tmp.path().join("cpu").join("c1").as_path())
        );
        assert_eq!(handle.subsystem_path(Subsystem::Freezer), None);
        assert_eq!(handle.pids().unwrap(), vec![Pid::from_raw(4242)]);
    }

    #[test]
    fn test_freeze() {
        let tmp = tempfile::tempdir().unwrap();
        let joined = joined_in(tmp.path(), &[Subsystem::Freezer]);
        let handle = handle(tmp.path(), joined);
        let state_file = tmp.path().join("freezer").join("c1").join("freezer.state");

        handle.freeze(FreezerState::Frozen).expect("freeze");
        assert_eq!(fs::read_to_string(&state_file).unwrap(), "FROZEN");

        handle.freeze(FreezerState::Thawed).expect("thaw");
        assert_eq!(fs::read_to_string(&state_file).unwrap(), "THAWED");
    }

    #[test]
    fn test_freeze_without_freezer() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = handle(tmp.path(), joined_in(tmp.path(), &[Subsystem::Cpu]));

        assert!(matches!(
            handle.freeze(FreezerState::Frozen),
            Err(FreezeError::NotJoined)
        ));
    }
}

//! Discovery of the cgroup v1 mounts of the host.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;
use procfs::process::Process;
use procfs::ProcError;

use crate::subsystem::{Subsystem, SUBSYSTEMS};

/// Subsystem whose mountpoint locates the shared root of all hierarchies.
pub const ROOT_PROBE: Subsystem = Subsystem::Cpu;

#[derive(thiserror::Error, Debug)]
pub enum MountError {
    #[error("failed to read process info from /proc/self: {0}")]
    ReadSelf(ProcError),
    #[error("failed to get mountinfo: {0}")]
    MountInfo(ProcError),
    #[error("failed to get cgroup membership of /proc/self: {0}")]
    CgroupInfo(ProcError),
    #[error("could not find a cgroup mountpoint for {probe}")]
    MountNotFound { probe: Subsystem },
    #[error("cgroup root {path} does not exist")]
    RootMissing { path: PathBuf },
    #[error("subsystem {subsystem} is not mounted")]
    SubsystemNotMounted { subsystem: Subsystem },
}

impl MountError {
    pub fn is_not_mounted(&self) -> bool {
        matches!(self, MountError::SubsystemNotMounted { .. })
    }
}

#[cfg_attr(test, automock)]
pub trait MountResolver {
    /// Returns the directory under which every subsystem hierarchy is mounted.
    fn resolve_root(&self) -> Result<PathBuf, MountError>;

    /// Returns the cgroup of the calling process in the hierarchy of `subsystem`,
    /// relative to that hierarchy's mountpoint.
    fn resolve_init_path(&self, subsystem: Subsystem) -> Result<PathBuf, MountError>;
}

impl<R: MountResolver + ?Sized> MountResolver for &R {
    fn resolve_root(&self) -> Result<PathBuf, MountError> {
        (**self).resolve_root()
    }

    fn resolve_init_path(&self, subsystem: Subsystem) -> Result<PathBuf, MountError> {
        (**self).resolve_init_path(subsystem)
    }
}

/// Resolves mounts from `/proc/self/mountinfo` and `/proc/self/cgroup`.
#[derive(Clone, Debug, Default)]
pub struct ProcMountResolver {
    root: Option<PathBuf>,
}

impl ProcMountResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `root` instead of deriving it from the mountpoint of [`ROOT_PROBE`].
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl MountResolver for ProcMountResolver {
    fn resolve_root(&self) -> Result<PathBuf, MountError> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => {
                let mount_point = get_subsystem_mount_point(ROOT_PROBE).map_err(|err| {
                    if err.is_not_mounted() {
                        MountError::MountNotFound { probe: ROOT_PROBE }
                    } else {
                        err
                    }
                })?;
                mount_point
                    .parent()
                    .map(Path::to_path_buf)
                    .ok_or(MountError::MountNotFound { probe: ROOT_PROBE })?
            }
        };

        if !root.exists() {
            return Err(MountError::RootMissing { path: root });
        }

        tracing::debug!(root = %root.display(), "resolved cgroup root");
        Ok(root)
    }

    fn resolve_init_path(&self, subsystem: Subsystem) -> Result<PathBuf, MountError> {
        get_subsystem_mount_point(subsystem)?;

        Process::myself()
            .map_err(MountError::ReadSelf)?
            .cgroups()
            .map_err(MountError::CgroupInfo)?
            .into_iter()
            .find(|c| c.controllers.iter().any(|ctrl| ctrl == subsystem.as_ref()))
            .map(|c| PathBuf::from(c.pathname))
            .ok_or(MountError::SubsystemNotMounted { subsystem })
    }
}

pub fn get_subsystem_mount_point(subsystem: Subsystem) -> Result<PathBuf, MountError> {
    Process::myself()
        .map_err(MountError::ReadSelf)?
        .mountinfo()
        .map_err(MountError::MountInfo)?
        .into_iter()
        .find(|m| {
            m.fs_type == "cgroup"
                && (m.super_options.contains_key(subsystem.as_ref())
                    || is_subsystem_mount(&m.mount_point, subsystem))
        })
        .map(|m| m.mount_point)
        .ok_or(MountError::SubsystemNotMounted { subsystem })
}

/// Some systems comount controllers (`cpu,cpuacct`, `net_cls,net_prio`) in one
/// directory, others give each its own.
fn is_subsystem_mount(mount_point: &Path, subsystem: Subsystem) -> bool {
    mount_point
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.split(',').any(|part| part == subsystem.as_ref()))
        .unwrap_or(false)
}

/// Resolver over a fixed root and a fixed set of mounted subsystems.
///
/// Useful when the caller already knows the layout, e.g. a pre-mounted tree in
/// a nested container or a temporary directory in tests.
#[derive(Clone, Debug)]
pub struct StaticMountResolver {
    root: PathBuf,
    init_paths: HashMap<Subsystem, PathBuf>,
}

impl StaticMountResolver {
    /// A resolver with no subsystem mounted.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            init_paths: HashMap::new(),
        }
    }

    /// A resolver with every known subsystem mounted at its hierarchy root.
    pub fn with_all<P: Into<PathBuf>>(root: P) -> Self {
        SUBSYSTEMS
            .iter()
            .fold(Self::new(root), |resolver, subsystem| {
                resolver.mount(*subsystem, "/")
            })
    }

    pub fn mount<P: Into<PathBuf>>(mut self, subsystem: Subsystem, init_path: P) -> Self {
        self.init_paths.insert(subsystem, init_path.into());
        self
    }

    pub fn unmount(mut self, subsystem: Subsystem) -> Self {
        self.init_paths.remove(&subsystem);
        self
    }
}

impl MountResolver for StaticMountResolver {
    fn resolve_root(&self) -> Result<PathBuf, MountError> {
        if !self.root.exists() {
            return Err(MountError::RootMissing {
                path: self.root.clone(),
            });
        }
        Ok(self.root.clone())
    }

    fn resolve_init_path(&self, subsystem: Subsystem) -> Result<PathBuf, MountError> {
        self.init_paths
            .get(&subsystem)
            .cloned()
            .ok_or(MountError::SubsystemNotMounted { subsystem })
    }
}

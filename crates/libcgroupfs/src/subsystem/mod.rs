//! The cgroup v1 subsystems a container is placed into.
//!
//! Every subsystem is joined before any of its limit files is written. The
//! order of [`SUBSYSTEMS`] is the order in which an apply visits them.
pub mod blkio;
pub(crate) mod controller;
pub mod cpu;
pub mod cpuacct;
pub mod cpuset;
pub mod devices;
pub mod freezer;
pub mod memory;
pub mod perf_event;

use std::fmt::Display;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use self::controller::{Controller, ControllerError};
use self::{
    blkio::Blkio, cpu::Cpu, cpuacct::CpuAcct, cpuset::CpuSet, devices::Devices, freezer::Freezer,
    memory::Memory, perf_event::PerfEvent,
};
use crate::common::WrappedIoError;
use crate::handle::JoinedSubsystem;
use crate::mount::{MountError, MountResolver};
use crate::path;
use crate::spec::ResourceSpec;

#[derive(Hash, PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Subsystem {
    #[serde(rename = "devices")]
    Devices,
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "cpu")]
    Cpu,
    #[serde(rename = "cpuset")]
    CpuSet,
    #[serde(rename = "cpuacct")]
    CpuAcct,
    #[serde(rename = "blkio")]
    Blkio,
    #[serde(rename = "perf_event")]
    PerfEvent,
    #[serde(rename = "freezer")]
    Freezer,
}

impl Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl AsRef<str> for Subsystem {
    fn as_ref(&self) -> &str {
        match *self {
            Self::Devices => "devices",
            Self::Memory => "memory",
            Self::Cpu => "cpu",
            Self::CpuSet => "cpuset",
            Self::CpuAcct => "cpuacct",
            Self::Blkio => "blkio",
            Self::PerfEvent => "perf_event",
            Self::Freezer => "freezer",
        }
    }
}

/// Subsystems in apply order. Devices are restricted before anything else
/// and the freezer comes last so a frozen start only freezes a fully
/// configured group.
pub const SUBSYSTEMS: &[Subsystem] = &[
    Subsystem::Devices,
    Subsystem::Memory,
    Subsystem::Cpu,
    Subsystem::CpuSet,
    Subsystem::CpuAcct,
    Subsystem::Blkio,
    Subsystem::PerfEvent,
    Subsystem::Freezer,
];

/// Everything a subsystem needs to join and configure one cgroup. Built once
/// per apply and shared read-only by all subsystems.
pub struct ApplyContext<'a> {
    pub root: PathBuf,
    pub hierarchy_path: PathBuf,
    pub pid: Pid,
    pub spec: &'a ResourceSpec,
    pub resolver: &'a dyn MountResolver,
}

impl<'a> ApplyContext<'a> {
    pub fn new(
        root: PathBuf,
        pid: Pid,
        spec: &'a ResourceSpec,
        resolver: &'a dyn MountResolver,
    ) -> Self {
        Self {
            root,
            hierarchy_path: spec.hierarchy_path(),
            pid,
            spec,
            resolver,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SubsystemError {
    #[error("subsystem {subsystem} is not mounted")]
    NotMounted { subsystem: Subsystem },
    #[error("failed to resolve mount of {subsystem}: {err}")]
    Mount {
        subsystem: Subsystem,
        #[source]
        err: MountError,
    },
    #[error("failed to join {subsystem} cgroup {path}: {err}")]
    JoinFailed {
        subsystem: Subsystem,
        path: PathBuf,
        #[source]
        err: WrappedIoError,
    },
    #[error("failed to write {file} of {subsystem} cgroup {path}: {err}")]
    LimitWriteFailed {
        subsystem: Subsystem,
        file: String,
        path: PathBuf,
        #[source]
        err: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SubsystemError {
    pub fn subsystem(&self) -> Subsystem {
        match self {
            SubsystemError::NotMounted { subsystem } => *subsystem,
            SubsystemError::Mount { subsystem, .. } => *subsystem,
            SubsystemError::JoinFailed { subsystem, .. } => *subsystem,
            SubsystemError::LimitWriteFailed { subsystem, .. } => *subsystem,
        }
    }

    pub fn is_not_mounted(&self) -> bool {
        matches!(self, SubsystemError::NotMounted { .. })
    }
}

impl Subsystem {
    /// Joins the context's pid to this subsystem and writes its limits.
    ///
    /// The subsystem is pushed onto `joined` as soon as the pid is in, before
    /// any limit is written, so a failed limit write still leaves it there to
    /// be rolled back.
    pub fn apply(
        &self,
        ctx: &ApplyContext,
        joined: &mut Vec<JoinedSubsystem>,
    ) -> Result<(), SubsystemError> {
        let subsystem = *self;
        let init_path = ctx
            .resolver
            .resolve_init_path(subsystem)
            .map_err(|err| match err {
                MountError::SubsystemNotMounted { .. } => SubsystemError::NotMounted { subsystem },
                err => SubsystemError::Mount { subsystem, err },
            })?;
        let home = path::directory_for(&ctx.root, subsystem, &init_path, Path::new(""));
        let cgroup_path = path::directory_for(&ctx.root, subsystem, &init_path, &ctx.hierarchy_path);
        let created_from = path::first_missing_dir(&home, &cgroup_path);
        tracing::debug!(%subsystem, path = %cgroup_path.display(), "apply subsystem");

        let joined_subsystem = JoinedSubsystem {
            subsystem,
            path: cgroup_path,
            home,
            created_from,
        };
        match subsystem {
            Subsystem::Devices => join_and_apply::<Devices>(ctx, joined_subsystem, joined),
            Subsystem::Memory => join_and_apply::<Memory>(ctx, joined_subsystem, joined),
            Subsystem::Cpu => join_and_apply::<Cpu>(ctx, joined_subsystem, joined),
            Subsystem::CpuSet => join_and_apply::<CpuSet>(ctx, joined_subsystem, joined),
            Subsystem::CpuAcct => join_and_apply::<CpuAcct>(ctx, joined_subsystem, joined),
            Subsystem::Blkio => join_and_apply::<Blkio>(ctx, joined_subsystem, joined),
            Subsystem::PerfEvent => join_and_apply::<PerfEvent>(ctx, joined_subsystem, joined),
            Subsystem::Freezer => join_and_apply::<Freezer>(ctx, joined_subsystem, joined),
        }
    }
}

fn join_and_apply<C: Controller>(
    ctx: &ApplyContext,
    target: JoinedSubsystem,
    joined: &mut Vec<JoinedSubsystem>,
) -> Result<(), SubsystemError> {
    let subsystem = target.subsystem;
    let cgroup_path = target.path.clone();

    if let Err(err) = C::add_task(ctx, &cgroup_path) {
        // the leaf is already gone, parents made on the way down go too
        if let Some(created_from) = &target.created_from {
            path::remove_created_parents(&cgroup_path, created_from);
        }
        return Err(SubsystemError::JoinFailed {
            subsystem,
            path: cgroup_path,
            err,
        });
    }
    joined.push(target);

    C::apply(ctx, &cgroup_path).map_err(|err| SubsystemError::LimitWriteFailed {
        subsystem,
        file: err
            .path()
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: cgroup_path,
        err: Box::new(err),
    })
}

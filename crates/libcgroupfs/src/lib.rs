//! Places processes into classic cgroup v1 hierarchies.
//!
//! Every subsystem (devices, memory, cpu, cpuset, cpuacct, blkio, perf_event,
//! freezer) is mounted separately below a shared root. Applying a
//! [`ResourceSpec`] joins a process to the same hierarchy path in each of them
//! and writes the requested limits; a failed apply removes whatever it
//! created. The returned [`ActiveCgroup`] tears the cgroups down again.
#[cfg(test)]
#[macro_use]
extern crate quickcheck;


pub mod common;
pub mod config;
pub mod handle;
pub mod manager;
pub mod mount;
pub mod path;
pub mod spec;
pub mod subsystem;

pub use config::CgroupConfig;
pub use handle::{ActiveCgroup, CleanupError, CleanupFailure, FreezeError, JoinedSubsystem};
pub use manager::{apply, ApplyError, Manager};
pub use mount::{MountError, MountResolver, ProcMountResolver, StaticMountResolver};
pub use spec::{DeviceRule, DeviceType, FreezerState, ResourceSpec, SpecError, UNLIMITED};
pub use subsystem::{Subsystem, SubsystemError, SUBSYSTEMS};

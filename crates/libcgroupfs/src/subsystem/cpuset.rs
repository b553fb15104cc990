use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use super::controller::Controller;
use super::{ApplyContext, Subsystem};
use crate::common::{self, WrapIoResult, WrappedIoError};
use crate::path;
use crate::spec::ResourceSpec;

const CGROUP_CPUSET_CPUS: &str = "cpuset.cpus";
const CGROUP_CPUSET_MEMS: &str = "cpuset.mems";

pub struct CpuSet {}

impl Controller for CpuSet {
    type Error = WrappedIoError;
    type Resource = ResourceSpec;

    fn add_task(ctx: &ApplyContext, cgroup_path: &Path) -> Result<(), WrappedIoError> {
        let mount_point = ctx.root.join(Subsystem::CpuSet.as_ref());
        path::ensure_joined_with(cgroup_path, ctx.pid, |cgroup_path| {
            Self::ensure_not_empty(&mount_point, cgroup_path, CGROUP_CPUSET_CPUS)?;
            Self::ensure_not_empty(&mount_point, cgroup_path, CGROUP_CPUSET_MEMS)
        })
    }

    fn apply(ctx: &ApplyContext, cgroup_path: &Path) -> Result<(), Self::Error> {
        tracing::debug!("Apply CpuSet cgroup config");

        if let Some(spec) = Self::needs_to_handle(ctx.spec) {
            Self::apply(cgroup_path, spec)?;
        }

        Ok(())
    }

    fn needs_to_handle(spec: &ResourceSpec) -> Option<&Self::Resource> {
        if spec.cpuset_cpus.is_some() || spec.cpuset_mems.is_some() {
            return Some(spec);
        }

        None
    }
}

impl CpuSet {
    fn apply(cgroup_path: &Path, spec: &ResourceSpec) -> Result<(), WrappedIoError> {
        if let Some(cpus) = &spec.cpuset_cpus {
            common::write_cgroup_file_str(cgroup_path.join(CGROUP_CPUSET_CPUS), cpus)?;
        }

        if let Some(mems) = &spec.cpuset_mems {
            common::write_cgroup_file_str(cgroup_path.join(CGROUP_CPUSET_MEMS), mems)?;
        }

        Ok(())
    }

    // A task cannot be moved into a cpuset whose cpus or mems are empty, the
    // kernel answers with ENOSPC. Copy the value down from the closest parent.
    fn ensure_not_empty(
        mount_point: &Path,
        cgroup_path: &Path,
        interface_file: &str,
    ) -> Result<(), WrappedIoError> {
        let relative_cgroup_path = cgroup_path
            .strip_prefix(mount_point)
            .map_err(|err| std::io::Error::new(ErrorKind::InvalidInput, err))
            .wrap_other(cgroup_path)?;

        let mut current = mount_point.to_path_buf();
        for component in relative_cgroup_path.components() {
            let parent_path = current.join(interface_file);
            let parent_value = match fs::read_to_string(&parent_path) {
                Ok(value) => value,
                // not backed by cgroupfs, nothing to inherit
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(err).wrap_read(&parent_path),
            };
            if parent_value.trim().is_empty() {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidData,
                    "cpuset parent value is empty",
                ))
                .wrap_other(&parent_path);
            }

            current.push(component);
            let child_path = current.join(interface_file);
            let child_value = match fs::read_to_string(&child_path) {
                Ok(value) => value,
                Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
                Err(err) => return Err(err).wrap_read(&child_path),
            };
            // the file can end with a newline which does not make it non-empty
            if child_value.trim().is_empty() {
                common::write_cgroup_file_str(&child_path, &parent_value)?;
            }
        }

        Ok(())
    }
}

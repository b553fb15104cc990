use std::path::Path;

use super::controller::Controller;
use super::ApplyContext;
use crate::common::{self, WrappedIoError};
use crate::spec::ResourceSpec;

const CGROUP_MEMORY_LIMIT: &str = "memory.limit_in_bytes";
const CGROUP_MEMORY_SWAP_LIMIT: &str = "memory.memsw.limit_in_bytes";
const CGROUP_MEMORY_RESERVATION: &str = "memory.soft_limit_in_bytes";

pub struct Memory {}

impl Controller for Memory {
    type Error = WrappedIoError;
    type Resource = ResourceSpec;

    fn apply(ctx: &ApplyContext, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("Apply Memory cgroup config");

        if let Some(spec) = Self::needs_to_handle(ctx.spec) {
            Self::apply(spec, cgroup_root)?;
        }

        Ok(())
    }

    fn needs_to_handle(spec: &ResourceSpec) -> Option<&Self::Resource> {
        if spec.memory_limit_bytes.is_some()
            || spec.memory_swap_limit_bytes.is_some()
            || spec.memory_reservation_bytes.is_some()
        {
            return Some(spec);
        }

        None
    }
}

impl Memory {
    fn apply(spec: &ResourceSpec, cgroup_root: &Path) -> Result<(), WrappedIoError> {
        // The kernel rejects a memory+swap limit below the memory limit, so on
        // a fresh cgroup the memory limit has to go first.
        if let Some(limit) = spec.memory_limit_bytes {
            common::write_cgroup_file(cgroup_root.join(CGROUP_MEMORY_LIMIT), limit)?;
        }

        if let Some(swap) = spec.memory_swap_limit_bytes {
            common::write_cgroup_file(cgroup_root.join(CGROUP_MEMORY_SWAP_LIMIT), swap)?;
        }

        if let Some(reservation) = spec.memory_reservation_bytes {
            common::write_cgroup_file(cgroup_root.join(CGROUP_MEMORY_RESERVATION), reservation)?;
        }

        Ok(())
    }
}

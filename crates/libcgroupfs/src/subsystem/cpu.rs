use std::path::Path;

use super::controller::Controller;
use super::ApplyContext;
use crate::common::{self, WrappedIoError};
use crate::spec::ResourceSpec;

const CGROUP_CPU_SHARES: &str = "cpu.shares";
const CGROUP_CPU_PERIOD: &str = "cpu.cfs_period_us";
const CGROUP_CPU_QUOTA: &str = "cpu.cfs_quota_us";

pub struct Cpu {}

impl Controller for Cpu {
    type Error = WrappedIoError;
    type Resource = ResourceSpec;

    fn apply(ctx: &ApplyContext, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("Apply Cpu cgroup config");

        if let Some(spec) = Self::needs_to_handle(ctx.spec) {
            Self::apply(cgroup_root, spec)?;
        }

        Ok(())
    }

    fn needs_to_handle(spec: &ResourceSpec) -> Option<&Self::Resource> {
        if spec.cpu_shares != 0 || spec.cpu_period.is_some() || spec.cpu_quota.is_some() {
            return Some(spec);
        }

        None
    }
}

impl Cpu {
    fn apply(root_path: &Path, spec: &ResourceSpec) -> Result<(), WrappedIoError> {
        if spec.cpu_shares != 0 {
            common::write_cgroup_file(root_path.join(CGROUP_CPU_SHARES), spec.cpu_shares)?;
        }

        if let Some(cpu_period) = spec.cpu_period {
            if cpu_period != 0 {
                common::write_cgroup_file(root_path.join(CGROUP_CPU_PERIOD), cpu_period)?;
            }
        }

        if let Some(cpu_quota) = spec.cpu_quota {
            if cpu_quota != 0 {
                common::write_cgroup_file(root_path.join(CGROUP_CPU_QUOTA), cpu_quota)?;
            }
        }

        Ok(())
    }
}

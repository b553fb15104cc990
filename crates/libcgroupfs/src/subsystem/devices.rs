use std::path::Path;

use super::controller::Controller;
use super::ApplyContext;
use crate::common::{self, WrappedIoError};
use crate::spec::{DeviceRule, DeviceType, ResourceSpec};

const CGROUP_DEVICES_ALLOW: &str = "devices.allow";
const CGROUP_DEVICES_DENY: &str = "devices.deny";

pub struct Devices {}

impl Controller for Devices {
    type Error = WrappedIoError;
    type Resource = [DeviceRule];

    fn apply(ctx: &ApplyContext, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("Apply Devices cgroup config");

        // revoke everything, then open up the baseline and the requested rules
        common::write_cgroup_file_str(cgroup_root.join(CGROUP_DEVICES_DENY), "a")?;

        let rules = Self::needs_to_handle(ctx.spec).unwrap_or_default();
        for d in default_allow_devices().iter().chain(rules) {
            Self::apply_device(d, cgroup_root)?;
        }

        Ok(())
    }

    // always needs to be called due to the default-deny baseline
    fn needs_to_handle(spec: &ResourceSpec) -> Option<&Self::Resource> {
        Some(&spec.device_rules)
    }
}

impl Devices {
    fn apply_device(device: &DeviceRule, cgroup_root: &Path) -> Result<(), WrappedIoError> {
        let path = if device.allow {
            cgroup_root.join(CGROUP_DEVICES_ALLOW)
        } else {
            cgroup_root.join(CGROUP_DEVICES_DENY)
        };

        common::write_cgroup_file_str(path, &device.to_string())?;
        Ok(())
    }
}

/// Devices every container may use regardless of its rules.
pub fn default_allow_devices() -> Vec<DeviceRule> {
    vec![
        DeviceRule::allow(DeviceType::Char, None, None, "m"),
        DeviceRule::allow(DeviceType::Block, None, None, "m"),
        // /dev/null
        DeviceRule::allow(DeviceType::Char, Some(1), Some(3), "rwm"),
        // /dev/zero
        DeviceRule::allow(DeviceType::Char, Some(1), Some(5), "rwm"),
        // /dev/full
        DeviceRule::allow(DeviceType::Char, Some(1), Some(7), "rwm"),
        // /dev/tty
        DeviceRule::allow(DeviceType::Char, Some(5), Some(0), "rwm"),
        // /dev/urandom
        DeviceRule::allow(DeviceType::Char, Some(1), Some(9), "rwm"),
        // /dev/random
        DeviceRule::allow(DeviceType::Char, Some(1), Some(8), "rwm"),
        // /dev/console
        DeviceRule::allow(DeviceType::Char, Some(5), Some(1), "rwm"),
        // /dev/pts
        DeviceRule::allow(DeviceType::Char, Some(136), None, "rwm"),
        // /dev/ptmx
        DeviceRule::allow(DeviceType::Char, Some(5), Some(2), "rwm"),
        // tun/tap
        DeviceRule::allow(DeviceType::Char, Some(10), Some(200), "rwm"),
    ]
}

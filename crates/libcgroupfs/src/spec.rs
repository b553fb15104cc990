//! Declarative description of the resources a container's cgroups should get.
use std::fmt::Display;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Value accepted by the memory limit files to lift a limit.
pub const UNLIMITED: i64 = -1;

const BLKIO_WEIGHT_MIN: u16 = 10;
const BLKIO_WEIGHT_MAX: u16 = 1000;

/// FreezerState is the requested state of the freezer subsystem.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FreezerState {
    /// Tasks in cgroup are running.
    #[default]
    Thawed,
    /// Tasks in cgroup are suspended.
    Frozen,
}

impl Display for FreezerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match self {
            FreezerState::Thawed => "THAWED",
            FreezerState::Frozen => "FROZEN",
        };

        write!(f, "{print}")
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// All devices
    #[default]
    #[serde(rename = "a")]
    All,
    /// Block device
    #[serde(rename = "b")]
    Block,
    /// Character device
    #[serde(rename = "c")]
    Char,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::All => "a",
            DeviceType::Block => "b",
            DeviceType::Char => "c",
        }
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line for `devices.allow` or `devices.deny`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRule {
    pub allow: bool,
    #[serde(rename = "type", default)]
    pub typ: DeviceType,
    /// `None` matches every major number.
    #[serde(default)]
    pub major: Option<i64>,
    /// `None` matches every minor number.
    #[serde(default)]
    pub minor: Option<i64>,
    /// Any combination of `r`, `w` and `m`.
    pub access: String,
}

impl DeviceRule {
    pub fn allow(typ: DeviceType, major: Option<i64>, minor: Option<i64>, access: &str) -> Self {
        Self {
            allow: true,
            typ,
            major,
            minor,
            access: access.to_owned(),
        }
    }

    pub fn deny(typ: DeviceType, major: Option<i64>, minor: Option<i64>, access: &str) -> Self {
        Self {
            allow: false,
            typ,
            major,
            minor,
            access: access.to_owned(),
        }
    }
}

impl Display for DeviceRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let major = self
            .major
            .map(|mj| mj.to_string())
            .unwrap_or_else(|| "*".to_string());
        let minor = self
            .minor
            .map(|mi| mi.to_string())
            .unwrap_or_else(|| "*".to_string());
        write!(f, "{} {}:{} {}", self.typ, major, minor, self.access)
    }
}

/// ResourceSpec describes one container group and the limits it should carry
/// in every subsystem.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceSpec {
    /// Leaf name of the hierarchy node.
    pub name: String,
    /// Optional grouping node, the effective path becomes `parent/name`.
    pub parent: Option<String>,
    /// Relative cpu weight, 0 leaves `cpu.shares` untouched.
    pub cpu_shares: u64,
    pub cpu_period: Option<u64>,
    pub cpu_quota: Option<i64>,
    pub memory_limit_bytes: Option<i64>,
    pub memory_swap_limit_bytes: Option<i64>,
    pub memory_reservation_bytes: Option<i64>,
    pub cpuset_cpus: Option<String>,
    pub cpuset_mems: Option<String>,
    pub blkio_weight: Option<u16>,
    /// Written in order after the default device baseline.
    pub device_rules: Vec<DeviceRule>,
    pub freeze_state: FreezerState,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SpecError {
    #[error("cgroup name must not be empty")]
    EmptyName,
    #[error("cgroup name {name:?} must be a single path component")]
    InvalidName { name: String },
    #[error("cgroup parent {parent:?} must be a relative path without '..'")]
    InvalidParent { parent: String },
    #[error("memory+swap limit {swap} is lower than memory limit {limit}")]
    SwapBelowLimit { limit: i64, swap: i64 },
    #[error("memory+swap limit {swap} needs a finite memory limit")]
    SwapWithoutLimit { swap: i64 },
    #[error("invalid blkio weight {weight}. valid range is 10-1000")]
    BlkioWeightOutOfRange { weight: u16 },
    #[error("invalid device access {access:?} in rule {rule}")]
    InvalidDeviceAccess { access: String, rule: String },
}

impl ResourceSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The hierarchy path shared by every subsystem, `parent/name` or `name`.
    pub fn hierarchy_path(&self) -> PathBuf {
        match &self.parent {
            Some(parent) if !parent.is_empty() => Path::new(parent).join(&self.name),
            _ => PathBuf::from(&self.name),
        }
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::EmptyName);
        }

        let mut name_components = Path::new(&self.name).components();
        match (name_components.next(), name_components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(SpecError::InvalidName {
                    name: self.name.clone(),
                })
            }
        }

        if let Some(parent) = &self.parent {
            let valid = Path::new(parent)
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
            if !valid {
                return Err(SpecError::InvalidParent {
                    parent: parent.clone(),
                });
            }
        }

        match (self.memory_limit_bytes, self.memory_swap_limit_bytes) {
            (_, None) | (_, Some(UNLIMITED)) => {}
            (None, Some(swap)) | (Some(UNLIMITED), Some(swap)) => {
                return Err(SpecError::SwapWithoutLimit { swap });
            }
            (Some(limit), Some(swap)) if swap < limit => {
                return Err(SpecError::SwapBelowLimit { limit, swap });
            }
            (Some(_), Some(_)) => {}
        }

        if let Some(weight) = self.blkio_weight {
            if !(BLKIO_WEIGHT_MIN..=BLKIO_WEIGHT_MAX).contains(&weight) {
                return Err(SpecError::BlkioWeightOutOfRange { weight });
            }
        }

        for rule in &self.device_rules {
            if rule.access.is_empty() || !rule.access.chars().all(|c| "rwm".contains(c)) {
                return Err(SpecError::InvalidDeviceAccess {
                    access: rule.access.clone(),
                    rule: rule.to_string(),
                });
            }
        }

        Ok(())
    }
}

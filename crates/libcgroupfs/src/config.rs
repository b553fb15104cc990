use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::subsystem::Subsystem;

const DEFAULT_REMOVE_RETRIES: u32 = 4;
const DEFAULT_REMOVE_BACKOFF_MS: u64 = 100;

/// Host dependent knobs for applying and removing cgroups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CgroupConfig {
    /// Directory holding the per-subsystem mounts. Discovered from
    /// `/proc/self/mountinfo` when unset.
    pub cgroup_root: Option<PathBuf>,
    /// Subsystems that may be missing on the host without failing an apply.
    pub optional_subsystems: Vec<Subsystem>,
    /// Attempts made to rmdir a busy cgroup directory.
    pub remove_retries: u32,
    /// Upper bound for the delay between two rmdir attempts.
    pub remove_backoff_ms: u64,
}

impl Default for CgroupConfig {
    fn default() -> Self {
        Self {
            cgroup_root: None,
            optional_subsystems: vec![Subsystem::PerfEvent],
            remove_retries: DEFAULT_REMOVE_RETRIES,
            remove_backoff_ms: DEFAULT_REMOVE_BACKOFF_MS,
        }
    }
}

impl CgroupConfig {
    pub fn is_optional(&self, subsystem: Subsystem) -> bool {
        self.optional_subsystems.contains(&subsystem)
    }

    pub fn remove_backoff(&self) -> Duration {
        Duration::from_millis(self.remove_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_only_perf_event_is_optional() {
        let config = CgroupConfig::default();
        for subsystem in crate::subsystem::SUBSYSTEMS {
            assert_eq!(
                config.is_optional(*subsystem),
                *subsystem == Subsystem::PerfEvent,
                "{subsystem}"
            );
        }
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: CgroupConfig = serde_json::from_str(
            r#"{"optionalSubsystems": ["perf_event", "blkio"], "cgroupRoot": "/tmp/cg"}"#,
        )
        .expect("deserialize config");

        assert!(config.is_optional(Subsystem::Blkio));
        assert!(config.is_optional(Subsystem::PerfEvent));
        assert!(!config.is_optional(Subsystem::Memory));
        assert_eq!(config.cgroup_root, Some(PathBuf::from("/tmp/cg")));
        assert_eq!(config.remove_retries, DEFAULT_REMOVE_RETRIES);
        assert_eq!(config.remove_backoff(), Duration::from_millis(100));
    }
}

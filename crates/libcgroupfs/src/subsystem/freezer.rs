use std::path::{Path, PathBuf};
use std::{thread, time};

use super::controller::{Controller, ControllerError};
use super::ApplyContext;
use crate::common::{self, WrappedIoError};
use crate::spec::{FreezerState, ResourceSpec};

const CGROUP_FREEZER_STATE: &str = "freezer.state";
const FREEZER_STATE_THAWED: &str = "THAWED";
const FREEZER_STATE_FROZEN: &str = "FROZEN";
const FREEZER_STATE_FREEZING: &str = "FREEZING";

#[derive(thiserror::Error, Debug)]
pub enum FreezerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("unexpected state {state} of {path} while freezing")]
    UnexpectedState { state: String, path: PathBuf },
    #[error("unable to freeze {path}")]
    UnableToFreeze { path: PathBuf },
}

impl ControllerError for FreezerError {
    fn path(&self) -> &Path {
        match self {
            FreezerError::WrappedIo(err) => err.path(),
            FreezerError::UnexpectedState { path, .. } => path,
            FreezerError::UnableToFreeze { path } => path,
        }
    }
}

pub struct Freezer {}

impl Controller for Freezer {
    type Error = FreezerError;
    type Resource = FreezerState;

    fn apply(ctx: &ApplyContext, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("Apply Freezer cgroup config");

        if let Some(freezer_state) = Self::needs_to_handle(ctx.spec) {
            Self::set_state(*freezer_state, cgroup_root)?;
        }

        Ok(())
    }

    // a new cgroup starts out thawed, only a frozen start needs a write
    fn needs_to_handle(spec: &ResourceSpec) -> Option<&Self::Resource> {
        match spec.freeze_state {
            FreezerState::Frozen => Some(&spec.freeze_state),
            FreezerState::Thawed => None,
        }
    }
}

impl Freezer {
    /// Moves every task of the cgroup at `cgroup_root` into `freezer_state`.
    /// Freezing waits until the kernel reports FROZEN and thaws the cgroup
    /// again if it never gets there.
    pub fn set_state(freezer_state: FreezerState, cgroup_root: &Path) -> Result<(), FreezerError> {
        let state_file = cgroup_root.join(CGROUP_FREEZER_STATE);
        match freezer_state {
            FreezerState::Thawed => {
                common::write_cgroup_file(&state_file, FREEZER_STATE_THAWED)?;
            }
            FreezerState::Frozen => {
                let r = || -> Result<(), FreezerError> {
                    // Retry while FREEZING is seen until it becomes FROZEN. Thawing
                    // and sleeping now and then helps on an extremely slow system.
                    for i in 0..1000 {
                        if i % 50 == 49 {
                            let _ = common::write_cgroup_file(&state_file, FREEZER_STATE_THAWED);
                            thread::sleep(time::Duration::from_millis(10));
                        }

                        common::write_cgroup_file(&state_file, FREEZER_STATE_FROZEN)?;

                        if i % 25 == 24 {
                            thread::sleep(time::Duration::from_millis(10));
                        }

                        let r = Self::read_freezer_state(cgroup_root)?;
                        match r.trim() {
                            FREEZER_STATE_FREEZING => {
                                continue;
                            }
                            FREEZER_STATE_FROZEN => {
                                if i > 1 {
                                    tracing::debug!("frozen after {} retries", i)
                                }
                                return Ok(());
                            }
                            _ => {
                                return Err(FreezerError::UnexpectedState {
                                    state: r,
                                    path: state_file.clone(),
                                });
                            }
                        }
                    }
                    Err(FreezerError::UnableToFreeze {
                        path: cgroup_root.to_path_buf(),
                    })
                }();

                if r.is_err() {
                    // never leave the cgroup FROZEN or FREEZING after a failure
                    let _ = common::write_cgroup_file(&state_file, FREEZER_STATE_THAWED);
                }
                return r;
            }
        }
        Ok(())
    }

    fn read_freezer_state(cgroup_root: &Path) -> Result<String, WrappedIoError> {
        common::read_cgroup_file(cgroup_root.join(CGROUP_FREEZER_STATE))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use nix::unistd::Pid;

    use super::*;
    use crate::common::CGROUP_PROCS;
    use crate::mount::StaticMountResolver;
    use crate::test::set_fixture;

    #[test]
    fn test_set_freezer_state() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_FREEZER_STATE, "").expect("set fixture for freezer state");

        // set Frozen state.
        {
            Freezer::set_state(FreezerState::Frozen, tmp.path()).expect("set freezer state");

            let state_content = fs::read_to_string(tmp.path().join(CGROUP_FREEZER_STATE))
                .expect("read to string");
            assert_eq!(FREEZER_STATE_FROZEN, state_content);
        }

        // set Thawed state.
        {
            Freezer::set_state(FreezerState::Thawed, tmp.path()).expect("set freezer state");

            let state_content = fs::read_to_string(tmp.path().join(CGROUP_FREEZER_STATE))
                .expect("read to string");
            assert_eq!(FREEZER_STATE_THAWED, state_content);
        }
    }

    #[test]
    fn test_add_and_apply() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = StaticMountResolver::with_all(tmp.path());
        set_fixture(tmp.path(), CGROUP_FREEZER_STATE, "").expect("set fixture for freezer state");
        set_fixture(tmp.path(), CGROUP_PROCS, "").expect("set fixture for proc file");

        // a thawed start leaves the state file alone
        {
            let spec = ResourceSpec::new("c1");
            let ctx = ApplyContext::new(tmp.path().to_path_buf(), Pid::from_raw(1000), &spec, &resolver);

            Freezer::add_task(&ctx, tmp.path()).expect("freezer add task");
            Freezer::apply(&ctx, tmp.path()).expect("freezer apply");

            let state_content = fs::read_to_string(tmp.path().join(CGROUP_FREEZER_STATE))
                .expect("read to string");
            assert_eq!("", state_content);
            let pid_content =
                fs::read_to_string(tmp.path().join(CGROUP_PROCS)).expect("read to string");
            assert_eq!(pid_content, "1000");
        }

        // set Frozen state.
        {
            let spec = ResourceSpec {
                freeze_state: FreezerState::Frozen,
                ..ResourceSpec::new("c1")
            };
            let ctx = ApplyContext::new(tmp.path().to_path_buf(), Pid::from_raw(1001), &spec, &resolver);

            Freezer::add_task(&ctx, tmp.path()).expect("freezer add task");
            Freezer::apply(&ctx, tmp.path()).expect("freezer apply");

            let state_content = fs::read_to_string(tmp.path().join(CGROUP_FREEZER_STATE))
                .expect("read to string");
            assert_eq!(FREEZER_STATE_FROZEN, state_content);
            let pid_content =
                fs::read_to_string(tmp.path().join(CGROUP_PROCS)).expect("read to string");
            assert_eq!(pid_content, "1001");
        }
    }

    #[test]
    fn test_freeze_failure_reports_state_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join(CGROUP_FREEZER_STATE)).unwrap();

        let err = Freezer::set_state(FreezerState::Frozen, tmp.path()).expect_err("cannot freeze");

        assert_eq!(
            ControllerError::path(&err),
            tmp.path().join(CGROUP_FREEZER_STATE)
        );
    }
}

use std::path::Path;

use super::controller::Controller;
use super::ApplyContext;
use crate::common::WrappedIoError;
use crate::spec::ResourceSpec;

pub struct PerfEvent {}

impl Controller for PerfEvent {
    type Error = WrappedIoError;
    type Resource = ();

    fn apply(_ctx: &ApplyContext, _cgroup_root: &Path) -> Result<(), Self::Error> {
        Ok(())
    }
    //no need to handle any case
    fn needs_to_handle(_spec: &ResourceSpec) -> Option<&Self::Resource> {
        None
    }
}

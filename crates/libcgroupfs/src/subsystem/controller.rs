use std::path::Path;

use super::ApplyContext;
use crate::common::WrappedIoError;
use crate::path;
use crate::spec::ResourceSpec;

/// Errors raised while writing limits carry the interface file they were about.
pub trait ControllerError: std::error::Error + Send + Sync + 'static {
    fn path(&self) -> &Path;
}

impl ControllerError for WrappedIoError {
    fn path(&self) -> &Path {
        WrappedIoError::path(self)
    }
}

pub(crate) trait Controller {
    type Error: ControllerError;
    type Resource: ?Sized;

    /// Adds the task of the context to the cgroup, creating the cgroup if needed
    fn add_task(ctx: &ApplyContext, cgroup_path: &Path) -> Result<(), WrappedIoError> {
        path::ensure_joined(cgroup_path, ctx.pid)
    }

    /// Applies resource restrictions to the cgroup
    fn apply(ctx: &ApplyContext, cgroup_path: &Path) -> Result<(), Self::Error>;

    /// Checks if the controller needs to write anything for this spec
    fn needs_to_handle(spec: &ResourceSpec) -> Option<&Self::Resource>;
}

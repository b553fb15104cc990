use std::path::Path;

use super::controller::Controller;
use super::ApplyContext;
use crate::common::WrappedIoError;
use crate::spec::ResourceSpec;

pub struct CpuAcct {}

impl Controller for CpuAcct {
    type Error = WrappedIoError;
    type Resource = ();

    fn apply(_ctx: &ApplyContext, _cgroup_path: &Path) -> Result<(), Self::Error> {
        Ok(())
    }

    // accounting only, joining is all there is to do
    fn needs_to_handle(_spec: &ResourceSpec) -> Option<&Self::Resource> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use nix::unistd::Pid;

    use super::*;
    use crate::common::CGROUP_PROCS;
    use crate::mount::StaticMountResolver;
    use crate::test::setup;

    #[test]
    fn test_add_task() {
        let (tmp, procs) = setup(CGROUP_PROCS);
        let resolver = StaticMountResolver::with_all(tmp.path());
        let spec = ResourceSpec::new("c1");
        let ctx = ApplyContext::new(tmp.path().to_path_buf(), Pid::from_raw(1000), &spec, &resolver);

        CpuAcct::add_task(&ctx, tmp.path()).expect("add task to cpuacct");
        CpuAcct::apply(&ctx, tmp.path()).expect("apply cpuacct");

        let content = fs::read_to_string(procs)
            .unwrap_or_else(|_| panic!("read {CGROUP_PROCS} file content"));
        assert_eq!(content, "1000");
    }
}

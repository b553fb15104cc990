use std::path::Path;

use super::controller::Controller;
use super::ApplyContext;
use crate::common::{self, WrappedIoError};
use crate::spec::ResourceSpec;

// Relative proportion of block I/O access available to the cgroup
// Format: weight (weight can range from 10 to 1000)
const BLKIO_WEIGHT: &str = "blkio.weight";

pub struct Blkio {}

impl Controller for Blkio {
    type Error = WrappedIoError;
    type Resource = u16;

    fn apply(ctx: &ApplyContext, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("Apply blkio cgroup config");

        if let Some(weight) = Self::needs_to_handle(ctx.spec) {
            Self::apply(cgroup_root, *weight)?;
        }

        Ok(())
    }

    fn needs_to_handle(spec: &ResourceSpec) -> Option<&Self::Resource> {
        spec.blkio_weight.as_ref()
    }
}

impl Blkio {
    fn apply(root_path: &Path, weight: u16) -> Result<(), WrappedIoError> {
        common::write_cgroup_file(root_path.join(BLKIO_WEIGHT), weight)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test::{set_fixture, setup};

    #[test]
    fn test_set_blkio_weight() {
        let (tmp, weight_file) = setup(BLKIO_WEIGHT);
        set_fixture(tmp.path(), BLKIO_WEIGHT, "500").unwrap();

        Blkio::apply(tmp.path(), 200).expect("apply blkio");

        let content = fs::read_to_string(weight_file).expect("read blkio weight");
        assert_eq!(content, "200");
    }

    #[test]
    fn test_weight_is_optional() {
        assert!(Blkio::needs_to_handle(&ResourceSpec::new("c1")).is_none());

        let spec = ResourceSpec {
            blkio_weight: Some(300),
            ..ResourceSpec::new("c1")
        };
        assert_eq!(Blkio::needs_to_handle(&spec), Some(&300));
    }
}

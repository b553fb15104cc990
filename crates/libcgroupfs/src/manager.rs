//! Places a process into every subsystem and undoes partial work on failure.
use nix::unistd::Pid;

use crate::config::CgroupConfig;
use crate::handle::{self, ActiveCgroup, CleanupError, JoinedSubsystem};
use crate::mount::{MountError, MountResolver, ProcMountResolver};
use crate::spec::{ResourceSpec, SpecError};
use crate::subsystem::{ApplyContext, SubsystemError, SUBSYSTEMS};

#[derive(thiserror::Error, Debug)]
pub enum ApplyError {
    #[error("invalid resource spec: {0}")]
    InvalidSpec(#[from] SpecError),
    #[error("failed to resolve cgroup root: {0}")]
    Mount(#[from] MountError),
    #[error(transparent)]
    Subsystem(#[from] SubsystemError),
    #[error("{source}; rollback failed: {rollback}")]
    RollbackFailed {
        source: SubsystemError,
        rollback: CleanupError,
    },
}

impl ApplyError {
    /// The subsystem failure that aborted the apply, if any.
    pub fn subsystem_error(&self) -> Option<&SubsystemError> {
        match self {
            ApplyError::Subsystem(err) => Some(err),
            ApplyError::RollbackFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Applies resource specs against the cgroup mounts found by `R`.
#[derive(Debug, Default)]
pub struct Manager<R = ProcMountResolver> {
    resolver: R,
    config: CgroupConfig,
}

impl Manager<ProcMountResolver> {
    pub fn new(config: CgroupConfig) -> Self {
        let resolver = match &config.cgroup_root {
            Some(root) => ProcMountResolver::with_root(root),
            None => ProcMountResolver::new(),
        };

        Self { resolver, config }
    }
}

impl<R: MountResolver> Manager<R> {
    pub fn with_resolver(resolver: R, config: CgroupConfig) -> Self {
        Self { resolver, config }
    }

    pub fn config(&self) -> &CgroupConfig {
        &self.config
    }

    /// Joins `pid` to every subsystem in order and writes the limits of
    /// `spec`. On failure the directories of all subsystems joined so far are
    /// removed before the error is returned.
    #[tracing::instrument(level = "debug", skip(self, spec), fields(name = %spec.name))]
    pub fn apply(&self, spec: &ResourceSpec, pid: Pid) -> Result<ActiveCgroup, ApplyError> {
        spec.validate()?;
        let root = self.resolver.resolve_root()?;
        let ctx = ApplyContext::new(root, pid, spec, &self.resolver);

        let mut joined = Vec::with_capacity(SUBSYSTEMS.len());
        for subsystem in SUBSYSTEMS {
            match subsystem.apply(&ctx, &mut joined) {
                Ok(()) => {}
                Err(err) if err.is_not_mounted() && self.config.is_optional(*subsystem) => {
                    tracing::warn!(%subsystem, "optional subsystem is not mounted, skipping");
                }
                Err(err) => return Err(self.rollback(&joined, pid, err)),
            }
        }

        tracing::info!(path = %ctx.hierarchy_path.display(), %pid, "cgroup applied");
        Ok(ActiveCgroup::new(
            ctx.root,
            pid,
            spec.clone(),
            joined,
            &self.config,
        ))
    }

    fn rollback(&self, joined: &[JoinedSubsystem], pid: Pid, source: SubsystemError) -> ApplyError {
        tracing::debug!(subsystem = %source.subsystem(), "rolling back partial apply: {}", source);
        match handle::rollback_joined(
            joined,
            pid,
            self.config.remove_retries,
            self.config.remove_backoff(),
        ) {
            Ok(()) => ApplyError::Subsystem(source),
            Err(rollback) => {
                tracing::error!("rollback after failed apply left cgroups behind: {}", rollback);
                ApplyError::RollbackFailed { source, rollback }
            }
        }
    }
}

/// Applies `spec` to `pid` using the host's cgroup mounts and the default
/// configuration.
pub fn apply(spec: &ResourceSpec, pid: Pid) -> Result<ActiveCgroup, ApplyError> {
    Manager::new(CgroupConfig::default()).apply(spec, pid)
}

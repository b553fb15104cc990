use std::{
    fs::{self, File},
    io::{BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use nix::{errno::Errno, unistd::Pid};

pub const CGROUP_PROCS: &str = "cgroup.procs";

#[derive(thiserror::Error, Debug)]
pub enum WrappedIoError {
    #[error("failed to open {path}: {err}")]
    Open { err: std::io::Error, path: PathBuf },
    #[error("failed to write {data} to {path}: {err}")]
    Write {
        err: std::io::Error,
        path: PathBuf,
        data: String,
    },
    #[error("failed to read {path}: {err}")]
    Read { err: std::io::Error, path: PathBuf },
    #[error("failed to create dir {path}: {err}")]
    CreateDir { err: std::io::Error, path: PathBuf },
    #[error("failed to remove {path}: {err}")]
    Remove { err: std::io::Error, path: PathBuf },
    #[error("at {path}: {err}")]
    Other { err: std::io::Error, path: PathBuf },
}

impl WrappedIoError {
    pub fn inner(&self) -> &std::io::Error {
        match self {
            WrappedIoError::Open { err, .. } => err,
            WrappedIoError::Write { err, .. } => err,
            WrappedIoError::Read { err, .. } => err,
            WrappedIoError::CreateDir { err, .. } => err,
            WrappedIoError::Remove { err, .. } => err,
            WrappedIoError::Other { err, .. } => err,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            WrappedIoError::Open { path, .. } => path,
            WrappedIoError::Write { path, .. } => path,
            WrappedIoError::Read { path, .. } => path,
            WrappedIoError::CreateDir { path, .. } => path,
            WrappedIoError::Remove { path, .. } => path,
            WrappedIoError::Other { path, .. } => path,
        }
    }
}

/// Writes `data` as the whole content of a cgroup interface file.
///
/// Interface files are opened with `O_TRUNC`. On cgroupfs the file already
/// exists once the directory has been created; `create(true)` only matters for
/// plain directory trees standing in for a cgroup mount.
#[inline]
pub fn write_cgroup_file_str<P: AsRef<Path>>(path: P, data: &str) -> Result<(), WrappedIoError> {
    let path = path.as_ref();

    fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .wrap_open(path)?
        .write_all(data.as_bytes())
        .wrap_write(path, data)?;

    Ok(())
}

#[inline]
pub fn write_cgroup_file<P: AsRef<Path>, T: ToString>(
    path: P,
    data: T,
) -> Result<(), WrappedIoError> {
    write_cgroup_file_str(path, &data.to_string())
}

#[inline]
pub fn read_cgroup_file<P: AsRef<Path>>(path: P) -> Result<String, WrappedIoError> {
    let path = path.as_ref();
    fs::read_to_string(path).wrap_read(path)
}

pub fn get_all_pids(path: &Path) -> Result<Vec<Pid>, WrappedIoError> {
    tracing::debug!("scan pids in folder: {:?}", path);
    let mut result = vec![];
    walk_dir(path, &mut |p| {
        let file_path = p.join(CGROUP_PROCS);
        if file_path.exists() {
            let file = File::open(&file_path).wrap_open(&file_path)?;
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                result.push(Pid::from_raw(
                    line.parse::<i32>()
                        .map_err(|err| std::io::Error::new(ErrorKind::InvalidData, err))
                        .wrap_other(&file_path)?,
                ))
            }
        }
        Ok::<(), WrappedIoError>(())
    })?;
    Ok(result)
}

fn walk_dir<F, E>(path: &Path, c: &mut F) -> Result<(), E>
where
    F: FnMut(&Path) -> Result<(), E>,
    E: From<WrappedIoError>,
{
    c(path)?;
    for entry in fs::read_dir(path).wrap_read(path)? {
        let entry = entry.wrap_open(path)?;
        let path = entry.path();

        if path.is_dir() {
            walk_dir(&path, c)?;
        }
    }
    Ok(())
}

/// Removes an empty directory, retrying while the kernel reports it as busy.
///
/// rmdir on a cgroup directory returns EBUSY for a short while after its last
/// task exited. Any other error is returned immediately. A missing directory
/// counts as removed.
pub(crate) fn delete_with_retry<P: AsRef<Path>, L: Into<Option<Duration>>>(
    path: P,
    retries: u32,
    limit_backoff: L,
) -> Result<(), WrappedIoError> {
    let mut attempts = 0;
    let mut delay = Duration::from_millis(10);
    let path = path.as_ref();
    let limit = limit_backoff.into().unwrap_or(Duration::MAX);

    loop {
        let err = match fs::remove_dir(path) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => err,
        };

        attempts += 1;
        if err.raw_os_error() != Some(Errno::EBUSY as i32) || attempts >= retries {
            return Err(err).wrap_remove(path);
        }

        std::thread::sleep(delay);
        delay *= attempts;
        if delay > limit {
            delay = limit;
        }
    }
}

pub(crate) trait WrapIoResult {
    type Target;

    fn wrap_create_dir<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_read<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_open<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_write<P: Into<PathBuf>, D: Into<String>>(
        self,
        path: P,
        data: D,
    ) -> Result<Self::Target, WrappedIoError>;
    fn wrap_remove<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_other<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
}

impl<T> WrapIoResult for Result<T, std::io::Error> {
    type Target = T;

    fn wrap_create_dir<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::CreateDir {
            err,
            path: path.into(),
        })
    }

    fn wrap_read<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Read {
            err,
            path: path.into(),
        })
    }

    fn wrap_open<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Open {
            err,
            path: path.into(),
        })
    }

    fn wrap_write<P: Into<PathBuf>, D: Into<String>>(
        self,
        path: P,
        data: D,
    ) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Write {
            err,
            path: path.into(),
            data: data.into(),
        })
    }

    fn wrap_remove<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Remove {
            err,
            path: path.into(),
        })
    }

    fn wrap_other<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Other {
            err,
            path: path.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_write_cgroup_file_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = set_fixture(tmp.path(), "cpu.shares", "1024000").unwrap();

        write_cgroup_file(&path, 512).expect("write cgroup file");

        assert_eq!(fs::read_to_string(path).unwrap(), "512");
    }

    #[test]
    fn test_write_cgroup_file_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("memory.limit_in_bytes");
        fs::create_dir(&path).unwrap();

        let err = write_cgroup_file(&path, 1).expect_err("writing to a directory fails");
        assert!(matches!(err, WrappedIoError::Open { .. }));
        assert_eq!(err.path(), path);
    }

    #[test]
    fn test_get_all_pids_walks_children() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_PROCS, "1\n2\n").unwrap();
        let child = tmp.path().join("child");
        fs::create_dir(&child).unwrap();
        set_fixture(&child, CGROUP_PROCS, "3\n").unwrap();

        let mut pids = get_all_pids(tmp.path()).expect("get pids");
        pids.sort();

        assert_eq!(
            pids,
            vec![Pid::from_raw(1), Pid::from_raw(2), Pid::from_raw(3)]
        );
    }

    #[test]
    fn test_delete_with_retry() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("c1");
        fs::create_dir(&dir).unwrap();

        delete_with_retry(&dir, 4, Duration::from_millis(100)).expect("delete dir");
        assert!(!dir.exists());
        // already gone
        delete_with_retry(&dir, 4, Duration::from_millis(100)).expect("delete missing dir");
    }

    #[test]
    fn test_delete_with_retry_non_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("c1");
        fs::create_dir_all(dir.join("nested")).unwrap();

        let err = delete_with_retry(&dir, 4, Duration::from_millis(100)).expect_err("dir is not empty");
        assert!(matches!(err, WrappedIoError::Remove { .. }));
        assert!(dir.exists());
    }
}

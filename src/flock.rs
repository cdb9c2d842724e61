use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use fs4::fs_std::FileExt;
use log::{debug, warn};
use thiserror::Error;

pub const LOCK_FILE_NAME: &str = ".repomirror.lock";

const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Keeps two runs from writing into the same destination root. Released on drop.
#[derive(Debug)]
pub struct DestinationLock {
    path: PathBuf,
    _file: File,
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Could not open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} is held by another run; gave up after {waited:?}")]
    Contended { path: PathBuf, waited: Duration },
    #[error("Could not lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl DestinationLock {
    /// Locks `destination_root`, waiting at most `timeout` for another run to finish.
    pub fn acquire(destination_root: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = destination_root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        let start = Instant::now();
        let mut announced = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(true) => {
                    debug!("Acquired {}", path.display());
                    return Ok(DestinationLock { path, _file: file });
                }
                Ok(false) => {}
                Err(error)
                    if error.raw_os_error() == fs4::lock_contended_error().raw_os_error() => {}
                Err(source) => return Err(LockError::Lock { path, source }),
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LockError::Contended { path, waited });
            }
            if !announced {
                warn!("Waiting for another run to release {}", path.display());
                announced = true;
            }
            std::thread::sleep(RETRY_INTERVAL.min(timeout - waited));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

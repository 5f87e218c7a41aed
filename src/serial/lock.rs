use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use super::{Result, SerialError};

/// Advisory lock on a per-device lock file.
///
/// TIOCEXCL refuses a second open only to unprivileged processes; this lock
/// also holds between instances running as root. It is released when the
/// guard is dropped. The lock file itself is left in place.
#[derive(Debug)]
pub struct DeviceLock {
    _file: File,
    path: PathBuf,
}

impl DeviceLock {
    /// Take the lock for `device_path` inside `lock_dir` without blocking.
    pub fn acquire(lock_dir: &Path, device_path: &str) -> Result<Self> {
        let path = lock_dir.join(lock_file_name(device_path));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| SerialError::Lock { path: path.clone(), source })?;

        match file.try_lock() {
            Ok(()) => {
                log::debug!("Locked {} via {}", device_path, path.display());
                Ok(Self { _file: file, path })
            }
            Err(TryLockError::WouldBlock) => Err(SerialError::Busy(device_path.to_string())),
            Err(TryLockError::Error(source)) => Err(SerialError::Lock { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// "/dev/ttyS1" -> "bl600-dev_ttyS1.lock"
fn lock_file_name(device_path: &str) -> String {
    let name: String = device_path
        .trim_start_matches(['/', '\\'])
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("bl600-{}.lock", name)
}

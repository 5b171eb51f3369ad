use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::state::StoreError;

/// Exclusive marker file. At most one live runner per state file.
///
/// Held for the lifetime of the value; removed on drop. A lock left behind by a
/// crashed process must be deleted by hand.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        }

        let mut f = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::Locked { path });
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        writeln!(f, "{}", std::process::id()).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), "instance lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to release instance lock: {}", e);
        }
    }
}

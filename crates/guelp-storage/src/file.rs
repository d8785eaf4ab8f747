//! Filesystem storage backend.
//!
//! Each key lives in its own file under the credentials directory. File names
//! are the base64url encoding of the key so arbitrary keys stay path-safe.
//! Writes land in a uniquely named temp file first and are renamed into place,
//! so a reader never observes a half-written value.

use crate::{StorageBackend, StorageResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores each key as a file in one directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a backend rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        restrict_permissions(&dir, 0o700)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(URL_SAFE_NO_PAD.encode(key.as_bytes()))
    }
}

impl StorageBackend for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let target = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

        let write = || -> std::io::Result<()> {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            restrict_permissions(&tmp, 0o600)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &target)
        };

        if let Err(err) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }

        debug!(key, "stored value");
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                debug!(key, "deleted value");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

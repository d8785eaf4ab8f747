//! On-disk layout of the client's home directory.
//!
//! ```text
//! ~/.guelp/
//!   config.json
//!   credentials/   session snapshot, owner-only
//!   logs/client.jsonl
//! ```

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

const HOME_DIR_NAME: &str = ".guelp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Rooted at `~/.guelp`.
    pub fn new() -> CoreResult<Self> {
        dirs::home_dir()
            .map(|home| Self::with_base_dir(home.join(HOME_DIR_NAME)))
            .ok_or_else(|| CoreError::Path("no home directory for the current user".to_string()))
    }

    /// Rooted at `base_dir` when given, otherwise at `~/.guelp`.
    pub fn resolve(base_dir: Option<PathBuf>) -> CoreResult<Self> {
        match base_dir {
            Some(dir) => Ok(Self::with_base_dir(dir)),
            None => Self::new(),
        }
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.base_dir.join("credentials")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn client_log_file(&self) -> PathBuf {
        self.logs_dir().join("client.jsonl")
    }

    /// Create the layout. The credentials directory is restricted to the
    /// owner on unix.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        for dir in [self.credentials_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&dir)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                self.credentials_dir(),
                std::fs::Permissions::from_mode(0o700),
            )?;
        }

        Ok(())
    }
}

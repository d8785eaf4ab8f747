//! Credential persistence for the Guelp client.
//!
//! Backends implement [`StorageBackend`]; the [`CredentialStore`] layers the
//! session snapshot format on top of whichever backend is in use:
//! - **File**: one file per key under `~/.guelp/credentials`
//! - **Memory**: process-local, for tests and environments without a disk

mod credentials;
mod file;
mod keys;
mod memory;
mod traits;

pub use credentials::{CredentialStore, SessionSnapshot, StoredSession};
pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::StorageBackend;

use guelp_config::Paths;
use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default durable backend under the credentials directory.
pub fn create_storage(paths: &Paths) -> StorageResult<Arc<dyn StorageBackend>> {
    let storage = FileStorage::new(paths.credentials_dir())?;
    Ok(Arc::new(storage))
}

/// Create a [`CredentialStore`] over the default backend.
pub fn create_credential_store(paths: &Paths) -> StorageResult<CredentialStore> {
    Ok(CredentialStore::new(create_storage(paths)?))
}

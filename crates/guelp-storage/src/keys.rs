//! Storage key constants.

/// Storage keys used by the client
pub struct StorageKeys;

impl StorageKeys {
    /// Persisted session snapshot (JSON)
    pub const AUTH_STATE: &'static str = "guelp-auth-state";
}

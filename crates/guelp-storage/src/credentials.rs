//! Persisted session snapshot and the store that owns it.

use crate::{StorageBackend, StorageKeys, StorageResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Last-known session, as written to durable storage.
///
/// Field names are camelCase on disk. Every field also accepts its snake_case
/// spelling so snapshots written by older clients still load. Nulls read as
/// empty, and a fractional expiry is truncated to whole seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default, alias = "access_token", deserialize_with = "null_as_default")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(
        default,
        alias = "expires_at",
        deserialize_with = "whole_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<i64>,
    #[serde(default, alias = "user_id", deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: BTreeSet<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub permissions: BTreeSet<String>,
    #[serde(default, alias = "teacher_id")]
    pub teacher_id: Option<String>,
    #[serde(default, alias = "student_id")]
    pub student_id: Option<String>,
}

impl SessionSnapshot {
    /// Whether the snapshot carries enough to restore a session.
    pub fn is_restorable(&self) -> bool {
        !self.access_token.is_empty() && !self.user_id.is_empty()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn whole_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Option::<f64>::deserialize(deserializer)?;
    Ok(secs.filter(|s| s.is_finite()).map(|s| s as i64))
}

/// Outcome of reading the stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredSession {
    Present(SessionSnapshot),
    Absent,
    /// The entry existed but could not be parsed and has been deleted.
    Discarded,
}

/// Durable persistence of the session snapshot under one key.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn StorageBackend>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Serialize and write the snapshot in one backend call.
    pub fn save(&self, snapshot: &SessionSnapshot) -> StorageResult<()> {
        let json = serde_json::to_string(snapshot)?;
        self.storage.set(StorageKeys::AUTH_STATE, &json)?;
        debug!(user_id = %snapshot.user_id, "session snapshot saved");
        Ok(())
    }

    /// Read the snapshot, treating a corrupt entry as absent.
    pub fn load(&self) -> StorageResult<Option<SessionSnapshot>> {
        Ok(match self.inspect()? {
            StoredSession::Present(snapshot) => Some(snapshot),
            StoredSession::Absent | StoredSession::Discarded => None,
        })
    }

    /// Read the snapshot and report whether a corrupt entry was discarded.
    pub fn inspect(&self) -> StorageResult<StoredSession> {
        let Some(raw) = self.storage.get(StorageKeys::AUTH_STATE)? else {
            return Ok(StoredSession::Absent);
        };

        if raw.trim().is_empty() {
            return Ok(StoredSession::Absent);
        }

        match serde_json::from_str::<SessionSnapshot>(&raw) {
            Ok(snapshot) => Ok(StoredSession::Present(snapshot)),
            Err(err) => {
                warn!(error = %err, "discarding unreadable session snapshot");
                self.storage.delete(StorageKeys::AUTH_STATE)?;
                Ok(StoredSession::Discarded)
            }
        }
    }

    /// Remove the snapshot. Succeeds when nothing is stored.
    pub fn clear(&self) -> StorageResult<()> {
        if self.storage.delete(StorageKeys::AUTH_STATE)? {
            debug!("session snapshot cleared");
        }
        Ok(())
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

//! Session data model: token pair and signed-in identity.

use guelp_storage::SessionSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Access/refresh token pair. Only the session manager mutates it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl From<&SessionSnapshot> for TokenPair {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            access_token: snapshot.access_token.clone(),
            refresh_token: snapshot.refresh_token.clone(),
            expires_at: snapshot.expires_at,
        }
    }
}

/// Identity of whoever delegated access to the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedBy {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

/// The signed-in user as the rest of the client sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    pub name: String,
    pub last_name: String,
    pub phone: String,
    pub address: String,
    pub teacher_id: Option<String>,
    pub student_id: Option<String>,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    pub requested_by: Option<RequestedBy>,
}

impl UserIdentity {
    /// Identity rebuilt from a persisted snapshot. Profile fields stay empty
    /// until the next profile refresh fills them in.
    pub fn provisional(snapshot: &SessionSnapshot) -> Self {
        Self {
            id: snapshot.user_id.clone(),
            email: snapshot.email.clone(),
            teacher_id: snapshot.teacher_id.clone(),
            student_id: snapshot.student_id.clone(),
            roles: snapshot.roles.clone(),
            permissions: snapshot.permissions.clone(),
            ..Default::default()
        }
    }

    /// True once profile details have been fetched.
    pub fn is_hydrated(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }
}

/// Build the snapshot persisted for a signed-in user.
pub fn snapshot_of(user: &UserIdentity, tokens: &TokenPair) -> SessionSnapshot {
    SessionSnapshot {
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone(),
        expires_at: tokens.expires_at,
        user_id: user.id.clone(),
        email: user.email.clone(),
        roles: user.roles.clone(),
        permissions: user.permissions.clone(),
        teacher_id: user.teacher_id.clone(),
        student_id: user.student_id.clone(),
    }
}

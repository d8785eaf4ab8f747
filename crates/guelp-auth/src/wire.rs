//! Backend response shapes and their normalization.
//!
//! Token responses may spell each field in snake_case or camelCase, and the
//! backend is not consistent about it within one body. Every field is read
//! under both names and resolved on its own; a field missing under both is
//! malformed.

use crate::model::{RequestedBy, TokenPair, UserIdentity};
use crate::{AuthError, AuthResult};
use serde::Deserialize;
use std::collections::BTreeSet;

pub(crate) const MALFORMED_LOGIN: &str = "Received malformed login response from server.";
pub(crate) const MALFORMED_PROFILE: &str = "Received malformed user profile from server.";

/// Normalized result of a login or refresh call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResult {
    pub tokens: TokenPair,
    pub requested_by: Option<RequestedBy>,
}

#[derive(Debug, Deserialize)]
struct TokenResponseWire {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default, rename = "accessToken")]
    access_token_camel: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, rename = "refreshToken")]
    refresh_token_camel: Option<String>,
    #[serde(default)]
    expires_at: Option<f64>,
    #[serde(default, rename = "expiresAt")]
    expires_at_camel: Option<f64>,
    #[serde(default)]
    requested_by: Option<RequestedByWire>,
    #[serde(default, rename = "requestedBy")]
    requested_by_camel: Option<RequestedByWire>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RequestedByWire {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    roles: Vec<Option<String>>,
    #[serde(default)]
    permissions: Vec<Option<String>>,
}

impl From<RequestedByWire> for RequestedBy {
    fn from(wire: RequestedByWire) -> Self {
        RequestedBy {
            email: wire.email.unwrap_or_default(),
            roles: non_empty(wire.roles),
            permissions: non_empty(wire.permissions),
        }
    }
}

/// Decode a login/refresh body into a token pair.
pub(crate) fn parse_token_response(body: &[u8]) -> AuthResult<LoginResult> {
    let wire: TokenResponseWire = serde_json::from_slice(body)
        .map_err(|_| AuthError::MalformedResponse(MALFORMED_LOGIN.to_string()))?;

    let malformed = || AuthError::MalformedResponse(MALFORMED_LOGIN.to_string());

    let access_token =
        either_token(wire.access_token, wire.access_token_camel).ok_or_else(malformed)?;
    let refresh_token =
        either_token(wire.refresh_token, wire.refresh_token_camel).ok_or_else(malformed)?;
    let expires_at = wire
        .expires_at
        .or(wire.expires_at_camel)
        .filter(|secs| secs.is_finite())
        .ok_or_else(malformed)?;
    let requested_by = wire.requested_by.or(wire.requested_by_camel);

    Ok(LoginResult {
        tokens: TokenPair {
            access_token,
            refresh_token: Some(refresh_token),
            expires_at: Some(expires_at as i64),
        },
        requested_by: requested_by.map(RequestedBy::from),
    })
}

/// First spelling that carries a non-blank token.
fn either_token(snake: Option<String>, camel: Option<String>) -> Option<String> {
    snake
        .filter(|t| !t.trim().is_empty())
        .or_else(|| camel.filter(|t| !t.trim().is_empty()))
}

/// Identifier the backend may send as a string or a number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum FlexibleId {
    Text(String),
    Number(i64),
}

impl FlexibleId {
    pub(crate) fn into_string(self) -> String {
        match self {
            FlexibleId::Text(s) => s,
            FlexibleId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoleWire {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    permissions: Option<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
struct ProfileWire {
    id: FlexibleId,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    roles: Option<Vec<RoleWire>>,
    #[serde(default)]
    teacher_id: Option<FlexibleId>,
    #[serde(default)]
    student_id: Option<FlexibleId>,
    #[serde(default)]
    requested_by: Option<RequestedByWire>,
}

/// Decode a `/users/{id}` body and map it to an identity.
///
/// Roles become the set of role codes; permissions are the union of every
/// role's permissions with empty entries dropped.
pub(crate) fn parse_profile(body: &[u8]) -> AuthResult<UserIdentity> {
    let wire: ProfileWire = serde_json::from_slice(body)
        .map_err(|_| AuthError::MalformedResponse(MALFORMED_PROFILE.to_string()))?;

    let id = wire.id.into_string();
    if id.trim().is_empty() {
        return Err(AuthError::MalformedResponse(MALFORMED_PROFILE.to_string()));
    }

    let roles = wire.roles.unwrap_or_default();
    let permissions = non_empty(
        roles
            .iter()
            .flat_map(|role| role.permissions.iter().flatten().cloned())
            .collect(),
    );
    let role_codes = non_empty(roles.into_iter().map(|role| role.code).collect());

    Ok(UserIdentity {
        id,
        email: wire.email.unwrap_or_default(),
        name: wire.name.unwrap_or_default(),
        last_name: wire.last_name.unwrap_or_default(),
        phone: wire.phone.unwrap_or_default(),
        address: wire.address.unwrap_or_default(),
        teacher_id: wire.teacher_id.map(FlexibleId::into_string),
        student_id: wire.student_id.map(FlexibleId::into_string),
        roles: role_codes,
        permissions,
        requested_by: wire.requested_by.map(RequestedBy::from),
    })
}

fn non_empty(values: Vec<Option<String>>) -> BTreeSet<String> {
    values
        .into_iter()
        .flatten()
        .filter(|v| !v.trim().is_empty())
        .collect()
}

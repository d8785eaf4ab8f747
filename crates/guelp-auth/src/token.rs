//! Access token claim decoding.
//!
//! Only the payload segment is read. Signature verification belongs to the
//! backend; the client needs the subject to know which profile to fetch.

use crate::wire::FlexibleId;
use crate::{AuthError, AuthResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

pub(crate) const INVALID_TOKEN: &str = "Received invalid access token.";
pub(crate) const MISSING_SUBJECT: &str = "Unable to parse authenticated user identifier.";

/// Claims the client cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenClaims {
    pub sub: Option<String>,
    pub email: Option<String>,
    /// Unix seconds.
    pub exp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ClaimsWire {
    #[serde(default)]
    sub: Option<FlexibleId>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    exp: Option<f64>,
}

impl TokenClaims {
    /// Subject claim, required for sign-in.
    pub fn subject(&self) -> AuthResult<&str> {
        match self.sub.as_deref().map(str::trim) {
            Some(sub) if !sub.is_empty() => Ok(sub),
            _ => Err(AuthError::InvalidToken(MISSING_SUBJECT.to_string())),
        }
    }
}

/// Decode the payload of a JWT without verifying it.
pub fn decode_claims(token: &str) -> AuthResult<TokenClaims> {
    let invalid = || AuthError::InvalidToken(INVALID_TOKEN.to_string());

    let token = token.trim();
    if token.is_empty() {
        return Err(invalid());
    }

    let payload = token.split('.').nth(1).ok_or_else(invalid)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| invalid())?;
    let wire: ClaimsWire = serde_json::from_slice(&bytes).map_err(|_| invalid())?;

    Ok(TokenClaims {
        sub: wire.sub.map(FlexibleId::into_string),
        email: wire.email,
        exp: wire.exp.filter(|e| e.is_finite()).map(|e| e as i64),
    })
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{header}.{payload}.signature")
}

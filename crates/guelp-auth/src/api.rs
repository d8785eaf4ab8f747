//! Backend auth endpoints.
//!
//! These calls bypass the interceptor pipeline: they carry credentials
//! explicitly and never trigger refresh or sign-out on their own.

use crate::model::{TokenPair, UserIdentity};
use crate::transport::{ApiRequest, HttpTransport};
use crate::wire::{self, LoginResult};
use crate::{AuthError, AuthResult};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct AuthApi {
    transport: Arc<dyn HttpTransport>,
}

impl AuthApi {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// `POST /auth/login`.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<LoginResult> {
        let request = ApiRequest::post(
            "/auth/login",
            json!({ "email": email, "password": password }),
        );
        let response = self.transport.execute(&request).await?;

        match response.status {
            s if (200..300).contains(&s) => wire::parse_token_response(&response.body),
            400 | 401 => Err(AuthError::InvalidCredentials),
            _ => Err(response.into_error()),
        }
    }

    /// `POST /auth/refresh`. `Ok(None)` when the backend has no refresh endpoint.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<Option<TokenPair>> {
        let request = ApiRequest::post(
            "/auth/refresh",
            json!({ "refresh_token": refresh_token }),
        );
        let response = self.transport.execute(&request).await?;

        match response.status {
            s if (200..300).contains(&s) => {
                let result = wire::parse_token_response(&response.body)?;
                debug!(expires_at = ?result.tokens.expires_at, "token refresh succeeded");
                Ok(Some(result.tokens))
            }
            404 | 405 => {
                info!(status = response.status, "refresh endpoint not available");
                Ok(None)
            }
            _ => Err(response.into_error()),
        }
    }

    /// `GET /users/{id}` with an explicit bearer token.
    pub async fn get_user(&self, user_id: &str, access_token: &str) -> AuthResult<UserIdentity> {
        let mut request = ApiRequest::get(format!("/users/{}", user_id.trim()));
        request.set_bearer(access_token);
        let response = self.transport.execute(&request).await?;

        if !response.is_success() {
            return Err(response.into_error());
        }
        wire::parse_profile(&response.body)
    }
}

impl std::fmt::Debug for AuthApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthApi").finish_non_exhaustive()
    }
}

//! Authenticated request pipeline.
//!
//! Outbound requests get the current access token. Responses are handled as:
//!
//! - 2xx: returned as-is.
//! - 401 on a first attempt: if another request already rotated the token,
//!   re-issue with the current one; otherwise go through the refresh
//!   coordinator and re-issue with the new token. No refresh token, or a
//!   refresh that yields nothing, forces sign-out.
//! - 401 on a re-issued request: propagated, session left alone.
//! - 403: forced sign-out, never retried.
//! - anything else: propagated untouched, as are transport failures.
//!
//! A logical request is re-issued at most once.

use crate::refresh::RefreshCoordinator;
use crate::session::SessionManager;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::{AuthError, AuthResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: Arc<SessionManager>,
    coordinator: Arc<RefreshCoordinator>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<SessionManager>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            transport,
            session,
            coordinator,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Send a request through the pipeline. Non-2xx outcomes become errors.
    pub async fn send(&self, mut request: ApiRequest) -> AuthResult<ApiResponse> {
        let sent_with = self.session.credentials();
        if let Some(token) = &sent_with.access_token {
            request.set_bearer(token);
        }

        loop {
            let response = self.transport.execute(&request).await?;
            if response.is_success() {
                return Ok(response);
            }

            match response.status {
                401 if !request.retried => {
                    let Some(token) = self.recover_from_unauthorized(&request).await else {
                        return Err(AuthError::Unauthorized);
                    };
                    request.retried = true;
                    request.set_bearer(&token);
                    debug!(path = %request.path, "Re-issuing request with new token");
                }
                401 => {
                    debug!(path = %request.path, "Re-issued request still unauthorized");
                    return Err(AuthError::Unauthorized);
                }
                403 => {
                    warn!(path = %request.path, "Request forbidden, signing out");
                    self.session.force_sign_out(sent_with.epoch).await;
                    return Err(AuthError::Forbidden);
                }
                _ => return Err(response.into_error()),
            }
        }
    }

    /// Token to retry with after a 401, or `None` once the session has been
    /// signed out.
    async fn recover_from_unauthorized(&self, request: &ApiRequest) -> Option<String> {
        let current = self.session.credentials();

        if let Some(token) = &current.access_token {
            if request.bearer() != Some(token.as_str()) {
                debug!(path = %request.path, "Token already rotated, retrying with current token");
                return Some(token.clone());
            }
        }

        let Some(refresh_token) = current.refresh_token else {
            warn!(path = %request.path, "Unauthorized without a refresh token, signing out");
            self.session.force_sign_out(current.epoch).await;
            return None;
        };

        match self
            .coordinator
            .refresh(&refresh_token, request.bearer(), current.epoch)
            .await
        {
            Some(tokens) => {
                let access_token = tokens.access_token.clone();
                if let Err(err) = self
                    .session
                    .apply_refreshed_tokens(tokens, current.epoch)
                    .await
                {
                    warn!(error = %err, "Failed to persist refreshed tokens");
                }
                Some(access_token)
            }
            None => {
                warn!(path = %request.path, "Token refresh unavailable, signing out");
                self.session.force_sign_out(current.epoch).await;
                None
            }
        }
    }

    pub async fn get(&self, path: &str) -> AuthResult<ApiResponse> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AuthResult<T> {
        self.get(path).await?.json()
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AuthResult<T> {
        let body = serde_json::to_value(body)?;
        self.send(ApiRequest::post(path, body)).await?.json()
    }

    pub async fn delete(&self, path: &str) -> AuthResult<()> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

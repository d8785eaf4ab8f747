//! Session and authentication core for the Guelp client.
//!
//! This crate provides:
//! - An explicit FSM for the session status (`loading`, `authenticated`, `unauthenticated`)
//! - Sign-in, sign-out, profile refresh, and restore-on-start via [`SessionManager`]
//! - Single-flight token refresh shared by every outstanding request
//! - An authenticated request pipeline that reacts to 401/403
//! - Role-based destination resolution and navigation redirect decisions

mod api;
mod auth_fsm;
mod error;
mod interceptor;
mod model;
mod navigation;
mod refresh;
mod role;
mod session;
mod token;
mod transport;
mod wire;

#[cfg(test)]
mod tests;

pub use api::AuthApi;
pub use auth_fsm::session_machine;
pub use auth_fsm::{SessionMachine, SessionMachineInput, SessionMachineState, SessionStatus};
pub use error::{
    AuthError, AuthResult, RESTORE_FAILED_MESSAGE, SESSION_EXPIRED_MESSAGE, SIGN_IN_FAILED_MESSAGE,
};
pub use interceptor::ApiClient;
pub use model::{RequestedBy, TokenPair, UserIdentity};
pub use navigation::{
    guard_area, root_redirect, NavigationDecision, NavigationState, RouteArea, LOGIN_PATH,
    ROOT_PATH,
};
pub use refresh::RefreshCoordinator;
pub use role::{Destination, RoleResolver};
pub use session::{
    BootstrapOutcome, SessionCredentials, SessionManager, SessionStateCallback,
    SessionStateChanged, SessionView,
};
pub use token::{decode_claims, TokenClaims};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, ReqwestTransport};
pub use wire::LoginResult;

pub use guelp_config::RoleMatchMode;

use guelp_config::Config;
use guelp_storage::CredentialStore;
use std::sync::Arc;

/// Fully wired client: session, refresh coordinator, and request pipeline
/// sharing one transport.
#[derive(Debug, Clone)]
pub struct AuthClient {
    pub session: Arc<SessionManager>,
    pub api: ApiClient,
}

impl AuthClient {
    /// Wire every component over `transport`.
    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        store: CredentialStore,
        config: &Config,
    ) -> Self {
        let auth_api = AuthApi::new(Arc::clone(&transport));
        let session = Arc::new(SessionManager::new(
            auth_api.clone(),
            store,
            config.role_match_mode,
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(auth_api, config.refresh_enabled));
        let api = ApiClient::new(transport, Arc::clone(&session), coordinator);
        Self { session, api }
    }

    /// Wire every component over a reqwest transport built from `config`.
    pub fn from_config(config: &Config, store: CredentialStore) -> AuthResult<Self> {
        let transport = ReqwestTransport::from_config(config)?;
        Ok(Self::with_transport(Arc::new(transport), store, config))
    }
}

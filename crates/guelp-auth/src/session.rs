//! Session management using an explicit FSM.
//!
//! `SessionManager` owns the in-memory session (status, identity, token pair,
//! last error) and the credential store. Every persisted write is built from
//! the in-memory state while the store lock is held, so the snapshot on disk
//! always matches what the last operation committed.
//!
//! Store calls run on the blocking pool while the async store lock is held,
//! so file I/O never stalls a runtime worker.
//!
//! A session epoch is bumped by every sign-in and sign-out. Long-running
//! operations remember the epoch they started under and refuse to commit if it
//! moved, which is how a sign-out issued during a pending sign-in wins.

use crate::api::AuthApi;
use crate::auth_fsm::{SessionMachine, SessionMachineInput, SessionStatus};
use crate::error::{RESTORE_FAILED_MESSAGE, SESSION_EXPIRED_MESSAGE};
use crate::model::{snapshot_of, TokenPair, UserIdentity};
use crate::navigation::NavigationState;
use crate::role::{Destination, RoleResolver};
use crate::{token, AuthError, AuthResult};
use guelp_config::RoleMatchMode;
use guelp_storage::{CredentialStore, StorageError, StorageResult, StoredSession};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Payload delivered to the state-change callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStateChanged {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
}

/// Callback type for session state change notifications.
pub type SessionStateCallback = Box<dyn Fn(SessionStateChanged) + Send + Sync>;

/// Everything the session exposes to readers, captured at one instant.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub status: SessionStatus,
    pub user: Option<UserIdentity>,
    pub tokens: Option<TokenPair>,
    pub last_error: Option<String>,
    pub destination: Option<Destination>,
}

/// Credentials handed to the request pipeline, tagged with the epoch they
/// belong to.
#[derive(Clone)]
pub struct SessionCredentials {
    pub epoch: u64,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |token: &Option<String>| token.as_ref().map(|_| "<redacted>");
        f.debug_struct("SessionCredentials")
            .field("epoch", &self.epoch)
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

/// Result of [`SessionManager::bootstrap`].
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// A snapshot was restored. The handle resolves once the profile has been
    /// fetched; on failure the session has already been signed out.
    Restored {
        hydration: JoinHandle<AuthResult<()>>,
    },
    NoSession,
    /// The stored snapshot could not be read and was deleted.
    Discarded,
}

struct SessionState {
    fsm: SessionMachine,
    user: Option<UserIdentity>,
    tokens: Option<TokenPair>,
    last_error: Option<String>,
    epoch: u64,
}

/// Owns the session lifecycle for the whole process.
pub struct SessionManager {
    api: AuthApi,
    store: tokio::sync::Mutex<CredentialStore>,
    state: Mutex<SessionState>,
    resolver: RoleResolver,
    state_callback: Mutex<Option<SessionStateCallback>>,
}

impl SessionManager {
    pub fn new(api: AuthApi, store: CredentialStore, role_match_mode: RoleMatchMode) -> Self {
        Self {
            api,
            store: tokio::sync::Mutex::new(store),
            state: Mutex::new(SessionState {
                fsm: SessionMachine::new(),
                user: None,
                tokens: None,
                last_error: None,
                epoch: 0,
            }),
            resolver: RoleResolver::new(role_match_mode),
            state_callback: Mutex::new(None),
        }
    }

    /// Set a callback to be notified of status changes.
    pub fn set_state_callback(&self, callback: SessionStateCallback) {
        *lock(&self.state_callback) = Some(callback);
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    /// Feed one input to the FSM. Returns whether the status changed.
    fn consume(state: &mut SessionState, input: SessionMachineInput) -> AuthResult<bool> {
        let old_status = SessionStatus::from(state.fsm.state());

        state.fsm.consume(&input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                state.fsm.state()
            ))
        })?;

        let new_status = SessionStatus::from(state.fsm.state());
        if old_status != new_status {
            debug!(old_status = %old_status, new_status = %new_status, "Session state transition");
        }
        Ok(old_status != new_status)
    }

    fn change_event(&self, state: &SessionState) -> SessionStateChanged {
        SessionStateChanged {
            status: SessionStatus::from(state.fsm.state()),
            user_id: state.user.as_ref().map(|u| u.id.clone()),
            destination: self.resolver.resolve(state.user.as_ref()),
        }
    }

    fn notify(&self, event: Option<SessionStateChanged>) {
        let Some(event) = event else { return };
        let cb = lock(&self.state_callback);
        if let Some(callback) = cb.as_ref() {
            callback(event);
        }
    }

    /// Drop the in-memory session and move to `unauthenticated`.
    fn reset(&self, state: &mut SessionState, last_error: Option<String>) -> Option<SessionStateChanged> {
        state.epoch += 1;
        state.user = None;
        state.tokens = None;
        state.last_error = last_error;
        // SignOut is accepted from every state.
        let changed = Self::consume(state, SessionMachineInput::SignOut).unwrap_or(false);
        changed.then(|| self.change_event(&*state))
    }

    async fn clear_store(&self) -> Result<(), StorageError> {
        let store = self.store.lock().await;
        let result = off_runtime(&store, |store| store.clear()).await;
        if let Err(err) = &result {
            warn!(error = %err, "Failed to clear persisted session");
        }
        result
    }

    // ==========================================
    // Bootstrap
    // ==========================================

    /// Restore the persisted session. Call once at startup.
    ///
    /// A restorable snapshot moves straight to `authenticated` with a
    /// provisional identity and schedules a profile refresh on the runtime.
    pub async fn bootstrap(self: &Arc<Self>) -> AuthResult<BootstrapOutcome> {
        let inspected = {
            let store = self.store.lock().await;
            off_runtime(&store, |store| store.inspect()).await
        };

        match inspected {
            Ok(StoredSession::Present(snapshot)) if snapshot.is_restorable() => {
                let event = {
                    let mut state = self.lock_state();
                    let changed = Self::consume(&mut state, SessionMachineInput::SessionRestored)?;
                    state.tokens = Some(TokenPair::from(&snapshot));
                    state.user = Some(UserIdentity::provisional(&snapshot));
                    state.last_error = None;
                    changed.then(|| self.change_event(&state))
                };
                self.notify(event);
                info!(user_id = %snapshot.user_id, "Restored persisted session");

                let manager = Arc::clone(self);
                let hydration = tokio::spawn(async move { manager.hydrate().await });
                Ok(BootstrapOutcome::Restored { hydration })
            }
            Ok(StoredSession::Present(_)) | Ok(StoredSession::Absent) => {
                let event = {
                    let mut state = self.lock_state();
                    let changed = Self::consume(&mut state, SessionMachineInput::NoSession)?;
                    state.last_error = None;
                    changed.then(|| self.change_event(&state))
                };
                self.notify(event);
                info!("No persisted session found");
                Ok(BootstrapOutcome::NoSession)
            }
            Ok(StoredSession::Discarded) => {
                warn!("Persisted session was unreadable and has been discarded");
                self.finish_failed_restore().await
            }
            Err(err) => {
                warn!(error = %err, "Failed to read persisted session");
                let _ = self.clear_store().await;
                self.finish_failed_restore().await
            }
        }
    }

    async fn finish_failed_restore(&self) -> AuthResult<BootstrapOutcome> {
        let event = {
            let mut state = self.lock_state();
            let changed = Self::consume(&mut state, SessionMachineInput::NoSession)?;
            state.user = None;
            state.tokens = None;
            state.last_error = Some(RESTORE_FAILED_MESSAGE.to_string());
            changed.then(|| self.change_event(&state))
        };
        self.notify(event);
        Ok(BootstrapOutcome::Discarded)
    }

    /// Fill in profile details for a restored session, signing out on failure.
    async fn hydrate(&self) -> AuthResult<()> {
        let (needs_profile, epoch) = {
            let state = self.lock_state();
            let needs = SessionStatus::from(state.fsm.state()).is_authenticated()
                && state.user.as_ref().is_some_and(|u| !u.is_hydrated());
            (needs, state.epoch)
        };
        if !needs_profile {
            return Ok(());
        }

        match self.refresh_profile().await {
            Ok(()) => {
                debug!("Restored session hydrated");
                Ok(())
            }
            Err(AuthError::Superseded) => {
                debug!("Hydration superseded by a newer session change");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Profile refresh after restore failed, signing out");
                self.force_sign_out(epoch).await;
                Err(err)
            }
        }
    }

    // ==========================================
    // Sign-in / sign-out
    // ==========================================

    /// Authenticate with email and password.
    ///
    /// Any failure leaves the session `unauthenticated` with no tokens, no
    /// identity, and no snapshot, and records `last_error`.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<UserIdentity> {
        let (epoch, event) = {
            let mut state = self.lock_state();
            let changed = Self::consume(&mut state, SessionMachineInput::SignInAttempt)?;
            state.epoch += 1;
            (state.epoch, changed.then(|| self.change_event(&state)))
        };
        self.notify(event);
        debug!(epoch, "Sign-in started");

        match self.complete_sign_in(email, password, epoch).await {
            Ok(user) => {
                info!(user_id = %user.id, "Signed in");
                Ok(user)
            }
            Err(AuthError::Superseded) => {
                info!("Sign-in superseded by a newer session change");
                Err(AuthError::Superseded)
            }
            Err(err) => {
                warn!(error = %err, "Sign-in failed");
                self.roll_back_sign_in(epoch, &err).await;
                Err(err)
            }
        }
    }

    async fn complete_sign_in(
        &self,
        email: &str,
        password: &str,
        epoch: u64,
    ) -> AuthResult<UserIdentity> {
        let login = self.api.login(email, password).await?;

        let claims = token::decode_claims(&login.tokens.access_token)?;
        let user_id = claims.subject()?.to_string();

        let mut user = self.api.get_user(&user_id, &login.tokens.access_token).await?;
        if login.requested_by.is_some() {
            user.requested_by = login.requested_by;
        }
        let tokens = login.tokens;

        let store = self.store.lock().await;
        if self.lock_state().epoch != epoch {
            return Err(AuthError::Superseded);
        }
        let snapshot = snapshot_of(&user, &tokens);
        off_runtime(&store, move |store| store.save(&snapshot)).await?;

        let event = {
            let mut state = self.lock_state();
            // A sign-out that slipped in after the save clears the snapshot
            // once the store lock is released.
            if state.epoch != epoch {
                return Err(AuthError::Superseded);
            }
            let changed = Self::consume(&mut state, SessionMachineInput::SignInSucceeded)?;
            state.tokens = Some(tokens);
            state.user = Some(user.clone());
            state.last_error = None;
            changed.then(|| self.change_event(&state))
        };
        drop(store);

        self.notify(event);
        Ok(user)
    }

    async fn roll_back_sign_in(&self, epoch: u64, err: &AuthError) {
        let store = self.store.lock().await;

        let event = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                return;
            }
            state.user = None;
            state.tokens = None;
            state.last_error = Some(err.user_message());
            let changed = Self::consume(&mut state, SessionMachineInput::SignInFailed)
                .or_else(|_| Self::consume(&mut state, SessionMachineInput::SignOut))
                .unwrap_or(false);
            changed.then(|| self.change_event(&state))
        };

        if let Err(clear_err) = off_runtime(&store, |store| store.clear()).await {
            warn!(error = %clear_err, "Failed to clear persisted session after sign-in failure");
        }
        drop(store);

        self.notify(event);
    }

    /// Sign out and forget the persisted session. Idempotent.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let event = {
            let mut state = self.lock_state();
            self.reset(&mut state, None)
        };
        self.notify(event);
        info!("Signed out");

        self.clear_store().await?;
        Ok(())
    }

    /// Sign out because the backend rejected the session.
    ///
    /// Only applies if the session is still the one identified by `epoch`;
    /// returns whether it did.
    pub async fn force_sign_out(&self, epoch: u64) -> bool {
        let (had_session, event) = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                debug!(epoch, current = state.epoch, "Ignoring stale forced sign-out");
                return false;
            }
            let had_session = state.tokens.is_some();
            let last_error = had_session.then(|| SESSION_EXPIRED_MESSAGE.to_string());
            (had_session, self.reset(&mut state, last_error))
        };
        self.notify(event);
        if had_session {
            warn!("Session rejected by backend, signed out");
        }

        let _ = self.clear_store().await;
        true
    }

    // ==========================================
    // Profile and token updates
    // ==========================================

    /// Re-fetch the profile and re-persist it with the current tokens.
    ///
    /// No-op without a session. Failure leaves the status unchanged.
    pub async fn refresh_profile(&self) -> AuthResult<()> {
        let current = {
            let state = self.lock_state();
            match (&state.user, &state.tokens) {
                (Some(user), Some(tokens))
                    if !user.id.is_empty() && !tokens.access_token.is_empty() =>
                {
                    Some((state.epoch, user.id.clone(), tokens.access_token.clone()))
                }
                _ => None,
            }
        };
        let Some((epoch, user_id, access_token)) = current else {
            debug!("No session to refresh profile for");
            return Ok(());
        };

        let mut fresh = self.api.get_user(&user_id, &access_token).await?;

        let store = self.store.lock().await;
        let snapshot = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                return Err(AuthError::Superseded);
            }
            let Some(tokens) = state.tokens.clone() else {
                return Err(AuthError::Superseded);
            };
            if fresh.requested_by.is_none() {
                fresh.requested_by = state.user.as_ref().and_then(|u| u.requested_by.clone());
            }
            let snapshot = snapshot_of(&fresh, &tokens);
            state.user = Some(fresh);
            snapshot
        };
        let user_id = snapshot.user_id.clone();
        off_runtime(&store, move |store| store.save(&snapshot)).await?;

        debug!(user_id = %user_id, "Profile refreshed");
        Ok(())
    }

    /// Merge a refreshed token pair into the session and re-persist it.
    ///
    /// Ignored when the session moved past `epoch` or already holds the pair.
    pub async fn apply_refreshed_tokens(&self, tokens: TokenPair, epoch: u64) -> AuthResult<bool> {
        let store = self.store.lock().await;
        let snapshot = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                debug!("Dropping refreshed tokens for a previous session");
                return Ok(false);
            }
            if state.tokens.as_ref() == Some(&tokens) {
                return Ok(false);
            }
            let Some(user) = state.user.as_ref() else {
                return Ok(false);
            };
            let snapshot = snapshot_of(user, &tokens);
            state.tokens = Some(tokens);
            snapshot
        };
        let user_id = snapshot.user_id.clone();
        off_runtime(&store, move |store| store.save(&snapshot)).await?;

        info!(user_id = %user_id, "Session tokens rotated");
        Ok(true)
    }

    // ==========================================
    // Readers
    // ==========================================

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from(self.lock_state().fsm.state())
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.lock_state().user.clone()
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.lock_state().tokens.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock_state()
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock_state()
            .tokens
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
    }

    pub fn credentials(&self) -> SessionCredentials {
        let state = self.lock_state();
        SessionCredentials {
            epoch: state.epoch,
            access_token: state.tokens.as_ref().map(|t| t.access_token.clone()),
            refresh_token: state.tokens.as_ref().and_then(|t| t.refresh_token.clone()),
        }
    }

    /// Exact role membership.
    pub fn has_role(&self, role: &str) -> bool {
        self.lock_state()
            .user
            .as_ref()
            .is_some_and(|u| u.roles.contains(role))
    }

    /// Exact permission membership.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.lock_state()
            .user
            .as_ref()
            .is_some_and(|u| u.permissions.contains(permission))
    }

    /// Recomputed on every call.
    pub fn destination(&self) -> Option<Destination> {
        let state = self.lock_state();
        self.resolver.resolve(state.user.as_ref())
    }

    pub fn view(&self) -> SessionView {
        let state = self.lock_state();
        SessionView {
            status: SessionStatus::from(state.fsm.state()),
            user: state.user.clone(),
            tokens: state.tokens.clone(),
            last_error: state.last_error.clone(),
            destination: self.resolver.resolve(state.user.as_ref()),
        }
    }

    pub fn navigation_state(&self) -> NavigationState {
        let state = self.lock_state();
        NavigationState {
            status: SessionStatus::from(state.fsm.state()),
            destination: self.resolver.resolve(state.user.as_ref()),
        }
    }
}

/// Run a store call on the blocking pool.
async fn off_runtime<T, F>(store: &CredentialStore, op: F) -> StorageResult<T>
where
    F: FnOnce(&CredentialStore) -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|err| StorageError::Backend(format!("storage task failed: {err}")))?
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

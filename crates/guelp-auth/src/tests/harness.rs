//! Test harness for session and pipeline tests.
//!
//! Provides:
//! - FakeBackend: an in-process `HttpTransport` with scripted auth endpoints
//! - Gate: holds a scripted endpoint until the test releases it
//! - TestClient: a wired `AuthClient` over FakeBackend and MemoryStorage

use crate::token::encode_test_token;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Method};
use crate::{AuthClient, AuthError, AuthResult, SessionManager};
use async_trait::async_trait;
use guelp_config::Config;
use guelp_storage::{CredentialStore, MemoryStorage, SessionSnapshot};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const FAR_FUTURE: i64 = 4_000_000_000;

/// A request as the backend saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub retried: bool,
}

/// Open/closed latch an endpoint waits on before answering.
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx }
    }

    pub fn close(&self) {
        self.tx.send_replace(false);
    }

    pub fn release(&self) {
        self.tx.send_replace(true);
    }

    async fn pass(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Casing {
    Snake,
    Camel,
}

#[derive(Debug, Clone)]
pub enum LoginScript {
    /// Mint a fresh pair for this user.
    Issue { user_id: String, casing: Casing },
    /// Answer with a fixed response.
    Respond { status: u16, body: Value },
}

#[derive(Debug, Clone)]
pub enum RefreshScript {
    /// Exchange a known refresh token for a new pair.
    Rotate,
    /// Issue a new access token and hand the same refresh token back.
    Reissue,
    Respond { status: u16, body: Value },
}

struct BackendState {
    login: LoginScript,
    refresh: RefreshScript,
    profiles: HashMap<String, Value>,
    profile_status: Option<u16>,
    valid_tokens: HashSet<String>,
    refresh_subjects: HashMap<String, String>,
    forbidden: HashSet<String>,
    always_unauthorized: HashSet<String>,
    failing: HashMap<String, u16>,
    offline: bool,
    issued: u64,
}

impl BackendState {
    fn mint_access(&mut self, user_id: &str) -> String {
        self.issued += 1;
        let token = encode_test_token(&json!({
            "sub": user_id,
            "email": format!("{user_id}@guelp.test"),
            "exp": FAR_FUTURE,
            "jti": self.issued,
        }));
        self.valid_tokens.insert(token.clone());
        token
    }

    fn mint_pair(&mut self, user_id: &str) -> (String, String) {
        let access = self.mint_access(user_id);
        let refresh = format!("refresh-{}", self.issued);
        self.refresh_subjects
            .insert(refresh.clone(), user_id.to_string());
        (access, refresh)
    }
}

/// In-process backend with scripted auth endpoints and token-checked data routes.
pub struct FakeBackend {
    state: Mutex<BackendState>,
    calls: Mutex<Vec<RecordedCall>>,
    pub login_gate: Gate,
    pub refresh_gate: Gate,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BackendState {
                login: LoginScript::Issue {
                    user_id: "user-1".to_string(),
                    casing: Casing::Snake,
                },
                refresh: RefreshScript::Rotate,
                profiles: HashMap::new(),
                profile_status: None,
                valid_tokens: HashSet::new(),
                refresh_subjects: HashMap::new(),
                forbidden: HashSet::new(),
                always_unauthorized: HashSet::new(),
                failing: HashMap::new(),
                offline: false,
                issued: 0,
            }),
            calls: Mutex::new(Vec::new()),
            login_gate: Gate::new(),
            refresh_gate: Gate::new(),
        })
    }

    /// Register a profile with `(role code, permissions)` entries.
    pub fn add_user(&self, user_id: &str, roles: &[(&str, &[&str])]) {
        let roles: Vec<Value> = roles
            .iter()
            .map(|(code, permissions)| json!({ "code": code, "permissions": permissions }))
            .collect();
        self.set_profile(
            user_id,
            json!({
                "id": user_id,
                "email": format!("{user_id}@guelp.test"),
                "name": "Test",
                "last_name": "User",
                "phone": "555-0100",
                "address": "1 School Road",
                "roles": roles,
                "teacher_id": null,
                "student_id": null,
            }),
        );
    }

    pub fn set_profile(&self, user_id: &str, profile: Value) {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(user_id.to_string(), profile);
    }

    pub fn script_login(&self, script: LoginScript) {
        self.state.lock().unwrap().login = script;
    }

    pub fn script_refresh(&self, script: RefreshScript) {
        self.state.lock().unwrap().refresh = script;
    }

    pub fn set_profile_status(&self, status: Option<u16>) {
        self.state.lock().unwrap().profile_status = status;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn forbid(&self, path: &str) {
        self.state.lock().unwrap().forbidden.insert(path.to_string());
    }

    pub fn always_unauthorized(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .always_unauthorized
            .insert(path.to_string());
    }

    pub fn fail(&self, path: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(path.to_string(), status);
    }

    /// Mint a valid access token for `user_id`.
    pub fn mint_access_token(&self, user_id: &str) -> String {
        self.state.lock().unwrap().mint_access(user_id)
    }

    /// Make every access token issued so far invalid.
    pub fn expire_access_tokens(&self) {
        self.state.lock().unwrap().valid_tokens.clear();
    }

    /// Snapshot carrying a freshly minted pair, for seeding storage.
    pub fn snapshot_for(&self, user_id: &str, roles: &[&str]) -> SessionSnapshot {
        let (access, refresh) = self.state.lock().unwrap().mint_pair(user_id);
        SessionSnapshot {
            access_token: access,
            refresh_token: Some(refresh),
            expires_at: Some(FAR_FUTURE),
            user_id: user_id.to_string(),
            email: format!("{user_id}@guelp.test"),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            permissions: Default::default(),
            teacher_id: None,
            student_id: None,
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == path)
            .count()
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls_to("/auth/refresh")
    }

    /// Wait until `path` has been hit at least `n` times.
    pub async fn wait_for_calls(&self, path: &str, n: usize) {
        let waited = timeout(TEST_TIMEOUT, async {
            while self.calls_to(path) < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "timed out waiting for {n} calls to {path}, saw {}",
            self.calls_to(path)
        );
    }

    fn handle_login(&self) -> ApiResponse {
        let mut state = self.state.lock().unwrap();
        match state.login.clone() {
            LoginScript::Respond { status, body } => respond(status, body),
            LoginScript::Issue { user_id, casing } => {
                let (access, refresh) = state.mint_pair(&user_id);
                let body = match casing {
                    Casing::Snake => json!({
                        "access_token": access,
                        "refresh_token": refresh,
                        "expires_at": FAR_FUTURE,
                    }),
                    Casing::Camel => json!({
                        "accessToken": access,
                        "refreshToken": refresh,
                        "expiresAt": FAR_FUTURE,
                    }),
                };
                respond(200, body)
            }
        }
    }

    fn handle_refresh(&self, request: &ApiRequest) -> ApiResponse {
        let mut state = self.state.lock().unwrap();
        match state.refresh.clone() {
            RefreshScript::Respond { status, body } => respond(status, body),
            script @ (RefreshScript::Rotate | RefreshScript::Reissue) => {
                let presented = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("refresh_token"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let Some(user_id) = state.refresh_subjects.get(&presented).cloned() else {
                    return respond(401, json!({ "detail": "invalid refresh token" }));
                };
                let (access, refresh) = match script {
                    RefreshScript::Reissue => (state.mint_access(&user_id), presented),
                    _ => {
                        state.refresh_subjects.remove(&presented);
                        state.mint_pair(&user_id)
                    }
                };
                respond(
                    200,
                    json!({
                        "access_token": access,
                        "refresh_token": refresh,
                        "expires_at": FAR_FUTURE,
                    }),
                )
            }
        }
    }

    fn handle_profile(&self, request: &ApiRequest, user_id: &str) -> ApiResponse {
        let state = self.state.lock().unwrap();
        if let Some(status) = state.profile_status {
            return respond(status, json!({ "detail": "scripted failure" }));
        }
        if !request.bearer().is_some_and(|t| state.valid_tokens.contains(t)) {
            return respond(401, json!({ "detail": "not authenticated" }));
        }
        match state.profiles.get(user_id) {
            Some(profile) => respond(200, profile.clone()),
            None => respond(404, json!({ "detail": "user not found" })),
        }
    }

    fn handle_data(&self, request: &ApiRequest, path: &str) -> ApiResponse {
        let state = self.state.lock().unwrap();
        if state.forbidden.contains(path) {
            return respond(403, json!({ "detail": "forbidden" }));
        }
        if let Some(status) = state.failing.get(path) {
            return respond(*status, json!({ "detail": "scripted failure" }));
        }
        if state.always_unauthorized.contains(path) {
            return respond(401, json!({ "detail": "not authenticated" }));
        }
        if !request.bearer().is_some_and(|t| state.valid_tokens.contains(t)) {
            return respond(401, json!({ "detail": "not authenticated" }));
        }
        respond(200, json!({ "ok": true, "path": path }))
    }
}

#[async_trait]
impl HttpTransport for FakeBackend {
    async fn execute(&self, request: &ApiRequest) -> AuthResult<ApiResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method,
            path: request.path.clone(),
            bearer: request.bearer().map(str::to_string),
            retried: request.retried,
        });

        if self.state.lock().unwrap().offline {
            return Err(AuthError::Transport("connection refused".to_string()));
        }

        let path = request
            .path
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();

        let response = match (request.method, path.as_str()) {
            (Method::Post, "/auth/login") => {
                self.login_gate.pass().await;
                self.handle_login()
            }
            (Method::Post, "/auth/refresh") => {
                self.refresh_gate.pass().await;
                self.handle_refresh(request)
            }
            (Method::Get, p) if p.starts_with("/users/") => {
                self.handle_profile(request, &p["/users/".len()..])
            }
            _ => self.handle_data(request, &path),
        };
        Ok(response)
    }
}

fn respond(status: u16, body: Value) -> ApiResponse {
    ApiResponse::new(status, body.to_string())
}

/// A fully wired client over a fake backend and in-memory storage.
pub struct TestClient {
    pub backend: Arc<FakeBackend>,
    pub storage: Arc<MemoryStorage>,
    pub client: AuthClient,
}

impl TestClient {
    pub fn new(backend: Arc<FakeBackend>) -> Self {
        Self::with_config(backend, Arc::new(MemoryStorage::new()), &Config::default())
    }

    pub fn with_config(
        backend: Arc<FakeBackend>,
        storage: Arc<MemoryStorage>,
        config: &Config,
    ) -> Self {
        let store = CredentialStore::new(storage.clone());
        let client = AuthClient::with_transport(backend.clone(), store, config);
        Self {
            backend,
            storage,
            client,
        }
    }

    /// Bootstrapped with no stored session, then signed in as the login script's user.
    pub async fn signed_in(backend: Arc<FakeBackend>) -> Self {
        let test = Self::new(backend);
        test.session().bootstrap().await.unwrap();
        test.session().sign_in("user@guelp.test", "secret").await.unwrap();
        test
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.client.session
    }

    pub fn seed(&self, snapshot: &SessionSnapshot) {
        CredentialStore::new(self.storage.clone())
            .save(snapshot)
            .unwrap();
    }

    pub fn stored_snapshot(&self) -> Option<SessionSnapshot> {
        CredentialStore::new(self.storage.clone()).load().unwrap()
    }
}

//! Single-flight token refresh.
//!
//! At most one refresh call is outstanding at a time. Callers arriving while
//! it runs attach to the same shared future and receive the same result. The
//! slot is emptied the moment the call settles, so the next 401 after that
//! starts a fresh exchange.
//!
//! The most recent exchange is remembered for callers that were rejected with
//! an access token older than the one it produced. It is only handed out
//! within the same session epoch, and never to a caller whose rejected token
//! is the one it produced.

use crate::api::AuthApi;
use crate::model::TokenPair;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

type RefreshFuture = Shared<BoxFuture<'static, Option<TokenPair>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
    waiters: usize,
}

struct LastExchange {
    epoch: u64,
    refresh_token: String,
    pair: TokenPair,
}

impl LastExchange {
    /// Whether a caller rejected with `rejected` can use this pair instead of
    /// exchanging `refresh_token` again.
    fn serves(&self, refresh_token: &str, rejected: Option<&str>, epoch: u64) -> bool {
        self.epoch == epoch
            && self.refresh_token == refresh_token
            && rejected != Some(self.pair.access_token.as_str())
    }
}

#[derive(Default)]
struct Slot {
    in_flight: Option<InFlight>,
    last_exchange: Option<LastExchange>,
}

/// Coordinates refresh calls across every request in the process.
pub struct RefreshCoordinator {
    api: AuthApi,
    enabled: bool,
    slot: Arc<Mutex<Slot>>,
    next_id: AtomicU64,
    attempts: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(api: AuthApi, enabled: bool) -> Self {
        Self {
            api,
            enabled,
            slot: Arc::new(Mutex::new(Slot::default())),
            next_id: AtomicU64::new(1),
            attempts: AtomicU64::new(0),
        }
    }

    /// Exchange `refresh_token` for a new pair.
    ///
    /// `rejected` is the access token the backend just refused and `epoch` the
    /// session it belongs to. Never fails: an unsupported endpoint, an error
    /// response, or a transport failure all yield `None`.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        rejected: Option<&str>,
        epoch: u64,
    ) -> Option<TokenPair> {
        if !self.enabled {
            debug!("token refresh disabled");
            return None;
        }

        let future = {
            let mut slot = lock(&self.slot);

            let reusable = slot
                .last_exchange
                .as_ref()
                .filter(|last| last.serves(refresh_token, rejected, epoch))
                .map(|last| last.pair.clone());
            if let Some(pair) = reusable {
                debug!("refresh token already exchanged, reusing result");
                return Some(pair);
            }
            slot.last_exchange = None;

            match slot.in_flight.as_mut() {
                Some(in_flight) => {
                    in_flight.waiters += 1;
                    debug!(
                        refresh_id = in_flight.id,
                        waiters = in_flight.waiters,
                        "joining in-flight refresh"
                    );
                    in_flight.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(refresh_id = id, attempt, "starting token refresh");

                    let future = exchange(
                        self.api.clone(),
                        refresh_token.to_string(),
                        Arc::clone(&self.slot),
                        id,
                        epoch,
                    )
                    .boxed()
                    .shared();

                    slot.in_flight = Some(InFlight {
                        id,
                        future: future.clone(),
                        waiters: 1,
                    });
                    future
                }
            }
        };

        future.await
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of refresh calls that reached the network layer.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.slot).in_flight.is_some()
    }
}

async fn exchange(
    api: AuthApi,
    refresh_token: String,
    slot: Arc<Mutex<Slot>>,
    id: u64,
    epoch: u64,
) -> Option<TokenPair> {
    let result = match api.refresh(&refresh_token).await {
        Ok(Some(pair)) => Some(pair),
        Ok(None) => None,
        Err(err) => {
            warn!(refresh_id = id, error = %err, "token refresh failed");
            None
        }
    };

    let mut slot = lock(&slot);
    if slot.in_flight.as_ref().is_some_and(|f| f.id == id) {
        if let Some(done) = slot.in_flight.take() {
            info!(
                refresh_id = id,
                waiters = done.waiters,
                refreshed = result.is_some(),
                "token refresh settled"
            );
        }
    }
    slot.last_exchange = result.as_ref().map(|pair| LastExchange {
        epoch,
        refresh_token,
        pair: pair.clone(),
    });

    result
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("enabled", &self.enabled)
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

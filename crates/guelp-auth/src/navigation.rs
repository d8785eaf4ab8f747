//! Redirect decisions for navigation collaborators.
//!
//! Pure functions over the session's status and destination; they never
//! touch the session themselves.

use crate::auth_fsm::SessionStatus;
use crate::role::Destination;
use serde::{Deserialize, Serialize};

pub const LOGIN_PATH: &str = "/auth/login";
pub const ROOT_PATH: &str = "/";

/// The part of the session navigation is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationState {
    pub status: SessionStatus,
    pub destination: Option<Destination>,
}

/// Top-level route group the user is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteArea {
    Auth,
    Role(Destination),
    Other,
}

impl RouteArea {
    /// Classify a path by its first segment.
    pub fn from_path(path: &str) -> Self {
        let first = path
            .trim_start_matches('/')
            .split(|c| c == '/' || c == '?' || c == '#')
            .next()
            .unwrap_or_default();
        match first {
            "auth" => RouteArea::Auth,
            "student" => RouteArea::Role(Destination::Student),
            "teacher" => RouteArea::Role(Destination::Teacher),
            "admin" => RouteArea::Role(Destination::Admin),
            _ => RouteArea::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    /// Session still loading; render nothing yet.
    Wait,
    Stay,
    Redirect(String),
}

/// Decision for the root layout given where the user currently is.
pub fn root_redirect(state: &NavigationState, current: RouteArea) -> NavigationDecision {
    if state.status == SessionStatus::Loading {
        return NavigationDecision::Wait;
    }

    let in_auth = current == RouteArea::Auth;

    match (state.status, state.destination) {
        (SessionStatus::Authenticated, Some(destination)) => {
            if in_auth {
                NavigationDecision::Redirect(destination.path())
            } else {
                NavigationDecision::Stay
            }
        }
        _ if in_auth => NavigationDecision::Stay,
        _ => NavigationDecision::Redirect(LOGIN_PATH.to_string()),
    }
}

/// Decision for a role-scoped area layout.
pub fn guard_area(state: &NavigationState, area: Destination) -> NavigationDecision {
    match state.status {
        SessionStatus::Loading => NavigationDecision::Wait,
        SessionStatus::Authenticated if state.destination == Some(area) => NavigationDecision::Stay,
        _ => NavigationDecision::Redirect(ROOT_PATH.to_string()),
    }
}

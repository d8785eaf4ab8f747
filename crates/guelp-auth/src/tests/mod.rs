//! Integration tests for the session core.
//!
//! - `harness.rs`     - fake backend, gates, and a wired test client
//! - `session.rs`     - bootstrap, sign-in, sign-out, profile refresh
//! - `refresh.rs`     - single-flight refresh coordinator
//! - `interceptor.rs` - 401/403 handling and retries in the request pipeline
//! - `end_to_end.rs`  - sign-in through destination and a refreshed request

pub(crate) mod harness;
mod interceptor;

//! Configuration, paths, and logging bootstrap for the Guelp client.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, RoleMatchMode, DEFAULT_API_BASE_URL, DEFAULT_API_TIMEOUT_MS};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_with, parse_level, LogConfig};
pub use paths::Paths;

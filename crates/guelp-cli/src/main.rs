//! Guelp binary entry point.
//!
//! Usage: guelp [--base-dir <dir>] <login|logout|status|get>
//!
//! The session is restored from the credentials directory on every run, so
//! `login` once and later commands reuse it until it expires or is revoked.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use guelp_auth::{AuthClient, BootstrapOutcome};
use guelp_config::{Config, LogConfig, Paths};
use std::path::PathBuf;
use tracing::{info, warn};

/// Guelp: sign in and call the Guelp API from the terminal.
#[derive(Parser, Debug)]
#[command(name = "guelp")]
#[command(about = "Sign in to Guelp and call its API from the terminal")]
struct Args {
    /// Directory holding config, credentials, and logs (default: ~/.guelp).
    #[arg(long, env = "GUELP_HOME", global = true)]
    base_dir: Option<PathBuf>,

    /// Backend base URL, overriding the config file.
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Mirror logs to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password.
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "GUELP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and delete the stored session.
    Logout,
    /// Show the current session.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Send an authenticated GET request and print the body.
    Get { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let paths = Paths::resolve(args.base_dir.clone()).context("cannot locate the Guelp home")?;
    paths.ensure_dirs()?;

    let mut config = Config::load(&paths)?;
    if let Some(url) = &args.api_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    guelp_config::init_logging_with(LogConfig {
        service_name: "guelp".into(),
        default_level: config.log_level.clone(),
        log_path: Some(paths.client_log_file()),
        also_stderr: args.verbose,
    });

    info!(
        base_dir = %paths.base_dir().display(),
        api_base_url = %config.api_base_url,
        "Guelp starting"
    );

    let store = guelp_storage::create_credential_store(&paths)?;
    let client = AuthClient::from_config(&config, store)?;
    restore_session(&client).await?;

    match args.command {
        Command::Login { email, password } => commands::login(&client, &email, &password).await,
        Command::Logout => commands::logout(&client).await,
        Command::Status { json } => commands::status(&client, json),
        Command::Get { path } => commands::get(&client, &path).await,
    }
}

/// Restore the stored session and wait for its profile to load.
async fn restore_session(client: &AuthClient) -> anyhow::Result<()> {
    match client.session.bootstrap().await? {
        BootstrapOutcome::Restored { hydration } => {
            if let Err(err) = hydration.await? {
                warn!(error = %err, "Stored session could not be refreshed");
            }
        }
        BootstrapOutcome::NoSession => {}
        BootstrapOutcome::Discarded => {
            if let Some(message) = client.session.last_error() {
                eprintln!("{message}");
            }
        }
    }
    Ok(())
}

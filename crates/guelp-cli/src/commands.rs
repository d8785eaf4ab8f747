//! Subcommand handlers.

use anyhow::bail;
use chrono::{DateTime, Utc};
use guelp_auth::{AuthClient, Destination, SessionStatus};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct StatusReport {
    status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination: Option<Destination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

pub async fn login(client: &AuthClient, email: &str, password: &str) -> anyhow::Result<()> {
    match client.session.sign_in(email, password).await {
        Ok(user) => {
            let destination = client
                .session
                .destination()
                .map(|d| d.path())
                .unwrap_or_default();
            println!("Signed in as {} ({destination})", user.display_name());
            Ok(())
        }
        Err(err) => {
            let message = client
                .session
                .last_error()
                .unwrap_or_else(|| err.user_message());
            bail!(message)
        }
    }
}

pub async fn logout(client: &AuthClient) -> anyhow::Result<()> {
    client.session.sign_out().await?;
    println!("Signed out");
    Ok(())
}

pub fn status(client: &AuthClient, json: bool) -> anyhow::Result<()> {
    let report = report(client);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("status:      {}", report.status);
    if let Some(email) = &report.email {
        println!("user:        {} <{email}>", report.name.as_deref().unwrap_or(""));
    }
    if !report.roles.is_empty() {
        println!("roles:       {}", report.roles.join(", "));
    }
    if let Some(destination) = report.destination {
        println!("destination: {}", destination.path());
    }
    if let Some(expires_at) = report.expires_at {
        println!("expires:     {}", expires_at.to_rfc3339());
    }
    if let Some(error) = &report.last_error {
        println!("last error:  {error}");
    }
    Ok(())
}

pub async fn get(client: &AuthClient, path: &str) -> anyhow::Result<()> {
    if !client.session.status().is_authenticated() {
        bail!("Not signed in. Run `guelp login` first.");
    }
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    match client.api.get(&path).await {
        Ok(response) => {
            println!("{}", response.text());
            Ok(())
        }
        Err(err) => match client.session.last_error() {
            Some(message) if !client.session.status().is_authenticated() => bail!(message),
            _ => Err(err.into()),
        },
    }
}

fn report(client: &AuthClient) -> StatusReport {
    let view = client.session.view();
    let user = view.user.as_ref();
    StatusReport {
        status: view.status,
        user_id: user.map(|u| u.id.clone()),
        email: user.map(|u| u.email.clone()),
        name: user.map(|u| u.display_name()),
        roles: user
            .map(|u| u.roles.iter().cloned().collect())
            .unwrap_or_default(),
        destination: view.destination,
        expires_at: view
            .tokens
            .as_ref()
            .and_then(|t| t.expires_at)
            .and_then(expiry_time),
        last_error: view.last_error,
    }
}

fn expiry_time(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

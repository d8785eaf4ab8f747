//! HTTP transport seam.
//!
//! Everything above this module speaks [`ApiRequest`]/[`ApiResponse`]; the
//! reqwest-backed implementation is the only place that touches the network.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use guelp_config::Config;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const AUTHORIZATION: &str = "authorization";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// One outbound request, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path beginning with `/`, optionally with a query string.
    pub path: String,
    /// Header names are stored lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Set once the request has been re-issued after a 401.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn set_bearer(&mut self, token: &str) {
        self.headers
            .insert(AUTHORIZATION.to_string(), format!("Bearer {token}"));
    }

    /// Token carried in the `Authorization` header, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// Status and raw body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> AuthResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Convert a non-success response into the matching error.
    pub fn into_error(self) -> AuthError {
        match self.status {
            401 => AuthError::Unauthorized,
            403 => AuthError::Forbidden,
            status => AuthError::HttpStatus {
                status,
                body: self.text(),
            },
        }
    }
}

/// Executes requests. A response with any status is `Ok`; `Err` means no
/// response was received at all.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> AuthResult<ApiResponse>;
}

/// reqwest-backed transport bound to one base URL.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> AuthResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        url::Url::parse(&base_url)?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &Config) -> AuthResult<Self> {
        config.api_base_url()?;
        Self::new(&config.api_base_url, config.api_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> AuthResult<url::Url> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Ok(url::Url::parse(&format!("{}{}", self.base_url, path))?)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> AuthResult<ApiResponse> {
        let url = self.url_for(&request.path)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        debug!(
            method = request.method.as_str(),
            path = %request.path,
            status,
            retried = request.retried,
            "request completed"
        );

        Ok(ApiResponse { status, body })
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Where request-signing credentials come from.
//!
//! Static keys from the environment win. Otherwise a workload running on
//! ECS (or any host exposing the container credentials endpoint) fetches
//! temporary role credentials and refreshes them before they expire.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::super::traits::{PlatformError, Result};
use super::sigv4::AwsCredentials;

/// Link-local host serving task-role credentials on ECS.
pub const CONTAINER_CREDENTIALS_HOST: &str = "http://169.254.170.2";

/// Fetched credentials are replaced this long before they expire.
const REFRESH_WINDOW_SECS: i64 = 300;

/// A container credentials endpoint.
#[derive(Clone)]
pub struct ContainerEndpoint {
    /// Full URL to GET
    pub url: String,
    /// Value of the `Authorization` header, if the endpoint wants one
    pub authorization: Option<String>,
    /// File holding the `Authorization` value, read on every fetch
    pub authorization_file: Option<PathBuf>,
}

impl std::fmt::Debug for ContainerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerEndpoint")
            .field("url", &self.url)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("authorization_file", &self.authorization_file)
            .finish()
    }
}

/// Source of signing credentials.
#[derive(Debug, Clone)]
pub enum CredentialsSource {
    /// Fixed keys
    Static(AwsCredentials),
    /// Temporary credentials from a container credentials endpoint
    Container(ContainerEndpoint),
}

impl CredentialsSource {
    /// Resolve the source from the process environment.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the source through an arbitrary variable lookup.
    ///
    /// Order: `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`, then
    /// `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` (relative to
    /// [`CONTAINER_CREDENTIALS_HOST`]), then
    /// `AWS_CONTAINER_CREDENTIALS_FULL_URI`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        if let Some(credentials) = AwsCredentials::from_lookup(&lookup) {
            return Some(Self::Static(credentials));
        }

        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let url = match get("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
            Some(relative) => format!("{}{}", CONTAINER_CREDENTIALS_HOST, relative),
            None => get("AWS_CONTAINER_CREDENTIALS_FULL_URI")?,
        };

        Some(Self::Container(ContainerEndpoint {
            url,
            authorization: get("AWS_CONTAINER_AUTHORIZATION_TOKEN"),
            authorization_file: get("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE").map(PathBuf::from),
        }))
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialsSource::Static(_) => "static",
            CredentialsSource::Container(_) => "container",
        }
    }
}

impl From<AwsCredentials> for CredentialsSource {
    fn from(credentials: AwsCredentials) -> Self {
        CredentialsSource::Static(credentials)
    }
}

/// Body returned by the container credentials endpoint.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<DateTime<Utc>>,
}

struct Cached {
    credentials: AwsCredentials,
    expiration: Option<DateTime<Utc>>,
}

impl Cached {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(expiration) => expiration - now > chrono::Duration::seconds(REFRESH_WINDOW_SECS),
            None => true,
        }
    }
}

/// Hands out current credentials, fetching and caching them as needed.
pub(crate) struct CredentialsProvider {
    source: CredentialsSource,
    request_timeout: Duration,
    cached: Mutex<Option<Cached>>,
}

impl CredentialsProvider {
    pub(crate) fn new(source: CredentialsSource, request_timeout: Duration) -> Self {
        Self {
            source,
            request_timeout,
            cached: Mutex::new(None),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.source.kind()
    }

    /// Credentials to sign the next request with.
    pub(crate) async fn credentials(&self, client: &reqwest::Client) -> Result<AwsCredentials> {
        let endpoint = match &self.source {
            CredentialsSource::Static(credentials) => return Ok(credentials.clone()),
            CredentialsSource::Container(endpoint) => endpoint,
        };

        // Held across the fetch so concurrent callers share one refresh
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref()
            && current.is_fresh(Utc::now())
        {
            return Ok(current.credentials.clone());
        }

        let fetched = self.fetch(client, endpoint).await?;
        let credentials = fetched.credentials.clone();
        *cached = Some(fetched);
        Ok(credentials)
    }

    async fn fetch(&self, client: &reqwest::Client, endpoint: &ContainerEndpoint) -> Result<Cached> {
        let authorization = match (&endpoint.authorization, &endpoint.authorization_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| {
                        PlatformError::Other(format!(
                            "Failed to read authorization token file {}: {}",
                            path.display(),
                            e
                        ))
                    })?
                    .trim()
                    .to_string(),
            ),
            (None, None) => None,
        };

        debug!(url = %endpoint.url, "Fetching container credentials");
        let mut request = client.get(&endpoint.url);
        if let Some(authorization) = authorization {
            request = request.header("authorization", authorization);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(PlatformError::Transport(format!(
                "Credentials endpoint returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let parsed: ContainerCredentials = serde_json::from_str(&body)
            .map_err(|e| PlatformError::Decode(format!("Invalid credentials response: {}", e)))?;

        info!(expiration = ?parsed.expiration, "Fetched container credentials");
        Ok(Cached {
            credentials: AwsCredentials {
                access_key_id: parsed.access_key_id,
                secret_access_key: parsed.secret_access_key,
                session_token: parsed.token,
            },
            expiration: parsed.expiration,
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> PlatformError {
        if error.is_timeout() {
            PlatformError::Timeout(self.request_timeout.as_millis() as u64)
        } else {
            PlatformError::Transport(format!("Credentials endpoint: {}", error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &'static str)]) -> Option<CredentialsSource> {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        CredentialsSource::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn test_static_keys_take_precedence() {
        let source = lookup(&[
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI", "/v2/credentials/abc"),
        ])
        .unwrap();
        assert_eq!(source.kind(), "static");
    }

    #[test]
    fn test_relative_uri_uses_link_local_host() {
        let Some(CredentialsSource::Container(endpoint)) =
            lookup(&[("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI", "/v2/credentials/abc")])
        else {
            panic!("expected container source");
        };
        assert_eq!(endpoint.url, "http://169.254.170.2/v2/credentials/abc");
        assert!(endpoint.authorization.is_none());
    }

    #[test]
    fn test_full_uri_with_token() {
        let Some(CredentialsSource::Container(endpoint)) = lookup(&[
            ("AWS_CONTAINER_CREDENTIALS_FULL_URI", "http://127.0.0.1:8123/creds"),
            ("AWS_CONTAINER_AUTHORIZATION_TOKEN", "Bearer xyz"),
        ]) else {
            panic!("expected container source");
        };
        assert_eq!(endpoint.url, "http://127.0.0.1:8123/creds");
        assert_eq!(endpoint.authorization.as_deref(), Some("Bearer xyz"));
        assert!(!format!("{:?}", endpoint).contains("xyz"));
    }

    #[test]
    fn test_no_source() {
        assert!(lookup(&[]).is_none());
        assert!(lookup(&[("AWS_ACCESS_KEY_ID", "AKID")]).is_none());
    }

    #[test]
    fn test_refresh_window() {
        let now = Utc::now();
        let cached = |expiration| Cached {
            credentials: AwsCredentials {
                access_key_id: "a".to_string(),
                secret_access_key: "b".to_string(),
                session_token: None,
            },
            expiration,
        };
        assert!(cached(None).is_fresh(now));
        assert!(cached(Some(now + chrono::Duration::hours(1))).is_fresh(now));
        assert!(!cached(Some(now + chrono::Duration::minutes(4))).is_fresh(now));
        assert!(!cached(Some(now - chrono::Duration::minutes(1))).is_fresh(now));
    }
}

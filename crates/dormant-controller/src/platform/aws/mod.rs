// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! AWS bindings for the platform traits.
//!
//! - [`Orchestrator`](super::Orchestrator) → ECS (JSON 1.1 protocol)
//! - [`NetworkInterfaces`](super::NetworkInterfaces) → EC2 (query protocol)
//! - [`DnsRecords`](super::DnsRecords) → Route 53 (REST/XML protocol)
//!
//! Requests are signed with SigV4 and sent over a single `reqwest` client
//! whose timeout bounds every call. Signing credentials are static keys or
//! temporary role credentials from the container credentials endpoint.

mod credentials;
mod ec2;
mod ecs;
mod route53;
pub mod sigv4;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, warn};

use super::traits::{PlatformError, Result};
pub use credentials::{CONTAINER_CREDENTIALS_HOST, ContainerEndpoint, CredentialsSource};
use credentials::CredentialsProvider;
pub use sigv4::AwsCredentials;
use sigv4::{SignableRequest, SigningParams};

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "eu-west-1";

/// Route 53 is a global service signed in this region.
const ROUTE53_SIGNING_REGION: &str = "us-east-1";

impl AwsCredentials {
    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN` through a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let access_key_id = lookup("AWS_ACCESS_KEY_ID").filter(|v| !v.is_empty())?;
        let secret_access_key = lookup("AWS_SECRET_ACCESS_KEY").filter(|v| !v.is_empty())?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: lookup("AWS_SESSION_TOKEN").filter(|v| !v.is_empty()),
        })
    }
}

/// Connection settings for the AWS bindings.
#[derive(Debug, Clone)]
pub struct AwsConfig {
    /// Region of the cluster and network resources
    pub region: String,
    /// Base URL that replaces every service endpoint (local stacks, tests)
    pub endpoint: Option<String>,
    /// Bound on each API call
    pub request_timeout: Duration,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// The AWS services the controller talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AwsService {
    Ecs,
    Ec2,
    Route53,
}

impl AwsService {
    fn signing_name(self) -> &'static str {
        match self {
            AwsService::Ecs => "ecs",
            AwsService::Ec2 => "ec2",
            AwsService::Route53 => "route53",
        }
    }

    fn signing_region(self, region: &str) -> &str {
        match self {
            AwsService::Route53 => ROUTE53_SIGNING_REGION,
            _ => region,
        }
    }

    fn default_endpoint(self, region: &str) -> String {
        match self {
            AwsService::Ecs => format!("https://ecs.{}.amazonaws.com", region),
            AwsService::Ec2 => format!("https://ec2.{}.amazonaws.com", region),
            AwsService::Route53 => "https://route53.amazonaws.com".to_string(),
        }
    }

    /// Extract `(code, message)` from an error response body.
    fn parse_error(self, body: &str) -> Option<(String, String)> {
        match self {
            AwsService::Ecs => ecs::parse_error(body),
            AwsService::Ec2 => ec2::parse_error(body),
            AwsService::Route53 => route53::parse_error(body),
        }
    }
}

/// A request to one of the AWS services.
struct AwsRequest<'a> {
    service: AwsService,
    method: Method,
    path: &'a str,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// ECS, EC2 and Route 53 over signed HTTPS.
#[derive(Clone)]
pub struct AwsPlatform {
    client: reqwest::Client,
    config: AwsConfig,
    credentials: Arc<CredentialsProvider>,
}

impl AwsPlatform {
    /// Create the bindings.
    pub fn new(config: AwsConfig, credentials: impl Into<CredentialsSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PlatformError::Other(format!("Failed to create HTTP client: {}", e)))?;
        let credentials = CredentialsProvider::new(credentials.into(), config.request_timeout);
        Ok(Self {
            client,
            config,
            credentials: Arc::new(credentials),
        })
    }

    /// Configured region.
    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Where signing credentials come from (`static` or `container`).
    pub fn credentials_kind(&self) -> &'static str {
        self.credentials.kind()
    }

    fn base_url(&self, service: AwsService) -> String {
        match &self.config.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => service.default_endpoint(&self.config.region),
        }
    }

    /// Sign and send a request, returning the body of a successful response.
    async fn send(&self, request: AwsRequest<'_>) -> Result<String> {
        let url = format!("{}{}", self.base_url(request.service), request.path);
        let url = Url::parse(&url)
            .map_err(|e| PlatformError::Other(format!("Invalid endpoint URL {}: {}", url, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(PlatformError::Other(format!("Endpoint URL has no host: {}", url)));
            }
        };

        let mut headers = request.headers;
        headers.push(("host".to_string(), host));

        let credentials = self.credentials.credentials(&self.client).await?;
        let signed = sigv4::sign(
            &SignableRequest {
                method: request.method.as_str(),
                path: url.path(),
                query: &[],
                headers: &headers,
                body: &request.body,
            },
            &SigningParams {
                credentials: &credentials,
                region: request.service.signing_region(&self.config.region),
                service: request.service.signing_name(),
                time: Utc::now(),
            },
        )?;

        let mut builder = self.client.request(request.method.clone(), url.clone());
        for (name, value) in headers.iter().chain(signed.iter()) {
            // reqwest derives Host from the URL
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        debug!(service = request.service.signing_name(), url = %url, "Sending AWS request");
        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            return Ok(body);
        }

        Err(api_error(request.service, status, &body))
    }

    fn transport_error(&self, error: reqwest::Error) -> PlatformError {
        if error.is_timeout() {
            PlatformError::Timeout(self.config.request_timeout.as_millis() as u64)
        } else {
            PlatformError::Transport(error.to_string())
        }
    }
}

fn api_error(service: AwsService, status: StatusCode, body: &str) -> PlatformError {
    let (code, message) = service
        .parse_error(body)
        .unwrap_or_else(|| (status.as_u16().to_string(), body.trim().to_string()));
    warn!(
        service = service.signing_name(),
        status = status.as_u16(),
        code = %code,
        "AWS request failed"
    );
    PlatformError::Api { code, message }
}

/// Text of the first descendant element named `name`.
fn xml_text<'a, 'input>(node: roxmltree::Node<'a, 'input>, name: &str) -> Option<&'a str> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
        .map(str::trim)
}

/// `(Code, Message)` from an XML error document.
fn xml_error(body: &str) -> Option<(String, String)> {
    let doc = roxmltree::Document::parse(body).ok()?;
    let root = doc.root_element();
    let code = xml_text(root, "Code")?;
    let message = xml_text(root, "Message").unwrap_or_default();
    Some((code.to_string(), message.to_string()))
}

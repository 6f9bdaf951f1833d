//! Azure Resource Manager client for network security groups
//!
//! Issues the single create-or-update call and then blocks until the remote
//! long-running operation reaches a terminal state. Nothing is retried: any
//! transport or HTTP failure, including one while polling, is returned as-is.
//!
//! # Long-running operations
//!
//! ARM signals completion in one of three ways, checked in this order:
//!
//! 1. `Azure-AsyncOperation` header: poll its status document until
//!    `Succeeded`/`Failed`/`Canceled`, then GET the resource.
//! 2. `Location` header: poll it; `202` means running, `200` is the result.
//! 3. `properties.provisioningState` in the response body: poll the resource
//!    itself until the state is terminal.
//!
//! The delay between polls is `Retry-After` when the server sends one,
//! otherwise the configured poll interval.

use crate::core::error::{ArmError, Error, Result};
use crate::core::nsg::NetworkSecurityGroup;
use reqwest::header::{AUTHORIZATION, HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_API_VERSION: &str = "2020-06-01";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Error bodies are kept for diagnostics but never printed in full
const MAX_ERROR_BODY_CHARS: usize = 4096;

/// Status of a long-running operation or a resource's provisioning state
#[derive(Debug, Clone, PartialEq, Eq, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum OperationStatus {
    Succeeded,
    Failed,
    Canceled,
    #[strum(default)]
    Running(String),
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Running(_))
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Succeeded => write!(f, "Succeeded"),
            OperationStatus::Failed => write!(f, "Failed"),
            OperationStatus::Canceled => write!(f, "Canceled"),
            OperationStatus::Running(state) => write!(f, "{state}"),
        }
    }
}

/// Identifies the network security group to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsgTarget {
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
}

impl NsgTarget {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// ARM resource id, e.g. `/subscriptions/s/resourceGroups/rg/providers/...`
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/networkSecurityGroups/{}",
            self.subscription_id, self.resource_group, self.name
        )
    }
}

/// Status document returned by an `Azure-AsyncOperation` URL
#[derive(Debug, Deserialize)]
struct AsyncOperationStatus {
    status: String,
    #[serde(default)]
    error: Option<ArmError>,
}

#[derive(Debug, Deserialize)]
struct ArmErrorEnvelope {
    error: ArmError,
}

/// Builder for [`ArmClient`].
pub struct ArmClientBuilder {
    endpoint: Url,
    api_version: String,
    timeout: Option<Duration>,
    poll_interval: Duration,
    token: Option<String>,
}

impl ArmClientBuilder {
    /// Creates a builder for the provided management endpoint.
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self> {
        let endpoint = Url::parse(endpoint.as_ref())
            .map_err(|e| Error::Config(format!("invalid endpoint url: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "invalid endpoint url: {endpoint} cannot be a base"
            )));
        }
        Ok(Self {
            endpoint,
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Some(DEFAULT_TIMEOUT),
            poll_interval: DEFAULT_POLL_INTERVAL,
            token: None,
        })
    }

    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Sets the per-request timeout for the underlying HTTP client.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Delay between polls when the server sends no `Retry-After`.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Builds the client. Redirects are never followed so the bearer token
    /// cannot leak to another host.
    pub fn build(self) -> Result<ArmClient> {
        let token = self
            .token
            .ok_or_else(|| Error::Auth("no bearer token configured".to_string()))?;

        let mut builder = HttpClient::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(ArmClient {
            endpoint: self.endpoint,
            api_version: self.api_version,
            poll_interval: self.poll_interval,
            token,
            http,
        })
    }
}

/// Async ARM client scoped to network security groups
pub struct ArmClient {
    endpoint: Url,
    api_version: String,
    poll_interval: Duration,
    token: String,
    http: HttpClient,
}

impl ArmClient {
    pub fn builder(endpoint: impl AsRef<str>) -> Result<ArmClientBuilder> {
        ArmClientBuilder::new(endpoint)
    }

    /// Full resource URL including the `api-version` query
    pub fn nsg_url(&self, target: &NsgTarget) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("invalid endpoint url: {}", self.endpoint)))?
            .pop_if_empty()
            .extend([
                "subscriptions",
                target.subscription_id.as_str(),
                "resourceGroups",
                target.resource_group.as_str(),
                "providers",
                "Microsoft.Network",
                "networkSecurityGroups",
                target.name.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    /// Creates or replaces the network security group and waits for the
    /// operation to finish.
    ///
    /// Returns the fully materialized resource as reported by the backend,
    /// including server-assigned fields such as `id`, `etag` and default rules.
    ///
    /// # Errors
    ///
    /// - [`Error::Auth`] on HTTP 401
    /// - [`Error::Api`] for any other non-success status
    /// - [`Error::Operation`] if the operation ends `Failed` or `Canceled`
    /// - [`Error::Http`] on transport failure
    pub async fn create_or_update_nsg(
        &self,
        target: &NsgTarget,
        body: &NetworkSecurityGroup,
    ) -> Result<Value> {
        let url = self.nsg_url(target)?;
        info!(
            "PUT {} ({} rule(s))",
            target.resource_id(),
            body.properties.security_rules.len()
        );

        let resp = self.send(self.http.put(url.clone()).json(body)).await?;
        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(Self::parse_error(resp).await);
        }

        let headers = resp.headers().clone();
        let initial = Self::read_json(resp).await?;
        let delay = self.retry_delay(&headers);

        if let Some(op_url) = header_url(&headers, ASYNC_OPERATION_HEADER) {
            debug!("Polling async operation {op_url}");
            self.poll_async_operation(op_url, delay).await?;
            return self.get_json(url).await;
        }

        if let Some(location) = header_url(&headers, LOCATION.as_str()) {
            debug!("Polling location {location}");
            return self.poll_location(location, url, delay).await;
        }

        match provisioning_state(&initial) {
            None => Ok(initial),
            Some(state) if state.is_terminal() => finish_provisioning(state, initial),
            Some(state) => {
                debug!("Provisioning state {state}, polling resource");
                self.poll_resource(url, delay).await
            }
        }
    }

    async fn poll_async_operation(&self, op_url: Url, mut delay: Duration) -> Result<()> {
        loop {
            tokio::time::sleep(delay).await;

            let resp = self.send(self.http.get(op_url.clone())).await?;
            if !resp.status().is_success() {
                return Err(Self::parse_error(resp).await);
            }
            delay = self.retry_delay(resp.headers());
            let body = Self::read_json(resp).await?;
            let doc: AsyncOperationStatus = serde_json::from_value(body)?;

            let status = OperationStatus::from_str(&doc.status)
                .unwrap_or_else(|_| OperationStatus::Running(doc.status.clone()));
            debug!("Async operation status: {status}");

            match status {
                OperationStatus::Succeeded => {
                    info!("Operation succeeded");
                    return Ok(());
                }
                OperationStatus::Failed | OperationStatus::Canceled => {
                    let error = doc.error.unwrap_or_default();
                    error!("Operation {status}: {error}");
                    return Err(Error::Operation {
                        status: status.to_string(),
                        error,
                    });
                }
                OperationStatus::Running(_) => {}
            }
        }
    }

    async fn poll_location(
        &self,
        location: Url,
        resource_url: Url,
        mut delay: Duration,
    ) -> Result<Value> {
        loop {
            tokio::time::sleep(delay).await;

            let resp = self.send(self.http.get(location.clone())).await?;
            match resp.status() {
                StatusCode::ACCEPTED => {
                    delay = self.retry_delay(resp.headers());
                }
                StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => {
                    info!("Operation succeeded");
                    let body = Self::read_json(resp).await?;
                    if body.is_null() {
                        return self.get_json(resource_url).await;
                    }
                    return Ok(body);
                }
                _ => return Err(Self::parse_error(resp).await),
            }
        }
    }

    async fn poll_resource(&self, url: Url, mut delay: Duration) -> Result<Value> {
        loop {
            tokio::time::sleep(delay).await;

            let resp = self.send(self.http.get(url.clone())).await?;
            if resp.status() != StatusCode::OK {
                return Err(Self::parse_error(resp).await);
            }
            delay = self.retry_delay(resp.headers());
            let body = Self::read_json(resp).await?;

            match provisioning_state(&body) {
                Some(state) if !state.is_terminal() => {
                    debug!("Provisioning state {state}");
                }
                Some(state) => return finish_provisioning(state, body),
                None => return Ok(body),
            }
        }
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        let resp = self.send(self.http.get(url)).await?;
        if resp.status() != StatusCode::OK {
            return Err(Self::parse_error(resp).await);
        }
        Self::read_json(resp).await
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let resp = req
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CLIENT_REQUEST_ID_HEADER, &request_id)
            .send()
            .await
            .map_err(|e| {
                error!("Request {request_id} failed: {e}");
                Error::Http(e)
            })?;
        debug!("Request {request_id} -> {}", resp.status());
        Ok(resp)
    }

    fn retry_delay(&self, headers: &HeaderMap) -> Duration {
        parse_retry_after(headers).unwrap_or(self.poll_interval)
    }

    /// Empty bodies read as `Value::Null`
    async fn read_json(resp: Response) -> Result<Value> {
        let bytes = resp.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn parse_error(resp: Response) -> Error {
        let status = resp.status();
        let body = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return Error::Http(e),
        };
        let error = parse_error_body(status, &body);
        error!("ARM returned {status}: {error}");

        if status == StatusCode::UNAUTHORIZED {
            return Error::Auth(error.to_string());
        }
        Error::Api {
            status: status.as_u16(),
            error,
        }
    }
}

/// Parses an ARM error envelope, falling back to the status text and raw body.
fn parse_error_body(status: StatusCode, body: &[u8]) -> ArmError {
    if let Ok(envelope) = serde_json::from_slice::<ArmErrorEnvelope>(body) {
        let mut error = envelope.error;
        if error.code.is_empty() {
            error.code = fallback_code(status);
        }
        return error;
    }

    let text = String::from_utf8_lossy(body);
    let message: String = text.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    ArmError {
        code: fallback_code(status),
        message,
        ..ArmError::default()
    }
}

fn fallback_code(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_u16().to_string(), |r| r.replace(' ', ""))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn header_url(headers: &HeaderMap, name: &str) -> Option<Url> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Url::parse(v).ok())
}

fn provisioning_state(body: &Value) -> Option<OperationStatus> {
    let state = body.get("properties")?.get("provisioningState")?.as_str()?;
    Some(
        OperationStatus::from_str(state)
            .unwrap_or_else(|_| OperationStatus::Running(state.to_string())),
    )
}

fn finish_provisioning(state: OperationStatus, body: Value) -> Result<Value> {
    match state {
        OperationStatus::Failed | OperationStatus::Canceled => Err(Error::Operation {
            status: state.to_string(),
            error: ArmError {
                code: "ProvisioningFailed".to_string(),
                message: format!("provisioningState is {state}"),
                ..ArmError::default()
            },
        }),
        _ => Ok(body),
    }
}

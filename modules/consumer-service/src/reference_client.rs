//! Client for the system of record's internal sync endpoint
//!
//! `GET {base}/internal/sync/user/{id}` with `X-Tenant-ID` and
//! `X-Consumer-ID`. The id comes off the bus and always travels as one
//! percent-encoded path segment. Auth failures (401/403) are terminal. A 404 on the first
//! attempt is retried, since the row may not be visible to the source's read
//! path yet; a 404 on any later attempt means the user is gone. Everything
//! else is retried with backoff.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::retry::{retry_with_backoff, RetryConfig};
use reqwest::Url;
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TENANT_HEADER: &str = "X-Tenant-ID";
pub const CONSUMER_HEADER: &str = "X-Consumer-ID";

/// Authoritative user data as returned by the source service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceUser {
    pub id: String,
    pub org_id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope {
    #[serde(default)]
    data: Option<ReferenceUser>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("reference service rejected credentials (status {status})")]
    Unauthorized { status: u16 },

    #[error("user not found in reference service")]
    NotFound,

    #[error("reference service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("invalid user id: {0:?}")]
    InvalidId(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FetchError::Unauthorized { .. } | FetchError::InvalidId(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            FetchError::Unauthorized { .. } => "ReferenceUnauthorized",
            FetchError::NotFound => "ReferenceNotFound",
            FetchError::Status { .. } => "ReferenceStatusError",
            FetchError::Transport(_) => "ReferenceTransportError",
            FetchError::Decode(_) => "ReferenceDecodeError",
            FetchError::InvalidId(_) => "ReferenceInvalidId",
        }
    }
}

/// A fetch that gave up after `attempts` round trips
#[derive(Debug, thiserror::Error)]
#[error("{error} (after {attempts} attempts)")]
pub struct FetchFailure {
    pub error: FetchError,
    pub attempts: u32,
}

/// One fetch as seen by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub consumer_id: String,
}

/// Status and body of a completed round trip
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Performs a single round trip; only connection-level failures are errors
#[async_trait]
pub trait ReferenceTransport: Send + Sync {
    async fn get_user(&self, request: &UserRequest) -> Result<RawResponse, FetchError>;
}

/// reqwest-backed transport
///
/// Pass a preconfigured `reqwest::Client` to [`HttpReferenceTransport::with_client`]
/// to install client certificates for mutual TLS.
#[derive(Clone)]
pub struct HttpReferenceTransport {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpReferenceTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Self::with_client(http_client, base_url)
    }

    pub fn with_client(http_client: reqwest::Client, base_url: &str) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FetchError::Transport(format!("invalid base URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::Transport(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// `{base}/internal/sync/user/{id}`, with `/`, `?` and `#` in the id encoded
    fn user_url(&self, user_id: &str) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                FetchError::Transport(format!("base URL {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["internal", "sync", "user"])
            .push(user_id);
        Ok(url)
    }
}

#[async_trait]
impl ReferenceTransport for HttpReferenceTransport {
    async fn get_user(&self, request: &UserRequest) -> Result<RawResponse, FetchError> {
        let url = self.user_url(&request.user_id)?;

        let response = self
            .http_client
            .get(url)
            .header(TENANT_HEADER, &request.tenant_id)
            .header(CONSUMER_HEADER, &request.consumer_id)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}

pub struct ReferenceDataClient {
    transport: Arc<dyn ReferenceTransport>,
    consumer_id: String,
    retry: RetryConfig,
}

impl ReferenceDataClient {
    pub fn new(
        transport: Arc<dyn ReferenceTransport>,
        consumer_id: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            transport,
            consumer_id: consumer_id.into(),
            retry,
        }
    }

    /// Fetch one user, `None` when the source no longer has it
    ///
    /// Ids that are empty or a dot segment are rejected without a request.
    pub async fn fetch_user(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Option<ReferenceUser>, FetchFailure> {
        if matches!(user_id.trim(), "" | "." | "..") {
            return Err(FetchFailure {
                error: FetchError::InvalidId(user_id.to_string()),
                attempts: 0,
            });
        }

        let request = UserRequest {
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            consumer_id: self.consumer_id.clone(),
        };

        let attempts = AtomicU32::new(0);
        let request = &request;
        let counter = &attempts;
        retry_with_backoff(
            move |attempt| {
                counter.store(attempt + 1, Ordering::Relaxed);
                self.attempt(request, attempt)
            },
            &self.retry,
            "reference_fetch_user",
            FetchError::is_retryable,
        )
        .await
        .map_err(|error| FetchFailure {
            error,
            attempts: attempts.load(Ordering::Relaxed),
        })
    }

    async fn attempt(
        &self,
        request: &UserRequest,
        attempt: u32,
    ) -> Result<Option<ReferenceUser>, FetchError> {
        let response = self.transport.get_user(request).await?;

        match response.status {
            401 | 403 => Err(FetchError::Unauthorized {
                status: response.status,
            }),
            404 if attempt > 0 => {
                tracing::info!(user_id = %request.user_id, attempt, "User absent in reference service");
                Ok(None)
            }
            404 => Err(FetchError::NotFound),
            200..=299 => {
                let envelope: DataEnvelope = serde_json::from_slice(&response.body)
                    .map_err(|e| FetchError::Decode(e.to_string()))?;
                Ok(envelope.data)
            }
            status => Err(FetchError::Status {
                status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            }),
        }
    }
}

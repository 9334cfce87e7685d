//! HTTP delivery of encoded batches to the Loki push endpoint.
//!
//! This module provides the [`Sender`], which posts a batch to Loki and retries
//! transient failures with exponential backoff.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, USER_AGENT as USER_AGENT_HEADER};
use reqwest::{Client, Response, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::batch::Batch;
use crate::config::{Auth, Config};

/// Content type of the push request body.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header carrying the tenant in multi-tenant mode.
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("loki-client/", env!("CARGO_PKG_VERSION"));

/// Maximum number of response body bytes kept in an error message.
const MAX_ERR_MSG_LEN: usize = 1024;

/// Failure of a single push attempt.
#[derive(Debug, Error)]
pub enum SendError {
    /// The request did not produce a response (connection failure, timeout)
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status
    #[error("server returned HTTP status {code} ({}): {message}", .code.as_u16())]
    Status { code: StatusCode, message: String },
}

impl SendError {
    /// Status code of the attempt; 0 when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            SendError::Request(_) => 0,
            SendError::Status { code, .. } => code.as_u16(),
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Connection-level failures, 429 and 5xx are retryable; every other status
    /// is a client error that a retry cannot fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            SendError::Request(_) => true,
            SendError::Status { code, .. } => {
                code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Final outcome of delivering one batch, when it was not delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The batch could not be serialized and was dropped
    #[error("error encoding batch: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The server rejected the batch with a non-retryable status
    #[error("batch rejected: {0}")]
    Rejected(#[source] SendError),

    /// Every attempt allowed by the backoff policy failed
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: SendError,
    },
}

/// Posts batches to the Loki push endpoint.
///
/// The underlying reqwest client is built once and reused so connections are
/// pooled across batches.
#[derive(Debug, Clone)]
pub struct Sender {
    client: Client,
    url: Url,
    timeout: Duration,
    backoff: BackoffConfig,
    auth: Option<Auth>,
}

impl Sender {
    /// Create a sender from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns the reqwest error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            timeout: config.timeout,
            backoff: config.backoff,
            auth: config.auth.clone(),
        })
    }

    /// Deliver a batch, retrying transient failures.
    ///
    /// The batch is encoded once. Connection failures, 429 and 5xx responses
    /// are retried while the backoff policy allows; any other response ends
    /// the attempt loop. Failures are logged here; the returned error is for
    /// callers that want to inspect the outcome.
    pub async fn send_batch(&self, tenant_id: &str, batch: Batch) -> Result<(), DeliveryError> {
        let (body, entries_count) = match batch.encode() {
            Ok((body, entries_count)) => (Bytes::from(body), entries_count),
            Err(e) => {
                error!(tenant_id, error = %e, "error encoding batch");
                return Err(DeliveryError::Encoding(e));
            }
        };
        drop(batch);

        let mut backoff = Backoff::new(self.backoff);
        let mut last_error: Option<SendError> = None;

        while backoff.ongoing() {
            match self.send(tenant_id, body.clone()).await {
                Ok(status) => {
                    debug!(
                        tenant_id,
                        status = status.as_u16(),
                        entries_count,
                        attempts = backoff.num_retries() + 1,
                        "batch sent"
                    );
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    error!(
                        tenant_id,
                        status = e.status(),
                        entries_count,
                        error = %e,
                        "final error sending batch"
                    );
                    return Err(DeliveryError::Rejected(e));
                }
                Err(e) => {
                    warn!(
                        tenant_id,
                        status = e.status(),
                        entries_count,
                        error = %e,
                        "error sending batch, will retry"
                    );
                    last_error = Some(e);
                    backoff.wait().await;
                }
            }
        }

        match last_error {
            Some(e) => {
                error!(
                    tenant_id,
                    status = e.status(),
                    entries_count,
                    attempts = backoff.num_retries(),
                    error = %e,
                    "final error sending batch"
                );
                Err(DeliveryError::RetriesExhausted {
                    attempts: backoff.num_retries(),
                    source: e,
                })
            }
            None => Ok(()),
        }
    }

    /// Send a single push request without retry logic.
    ///
    /// Returns the status on 2xx; any other status becomes
    /// [`SendError::Status`] with the first line of the response body.
    pub async fn send(&self, tenant_id: &str, body: Bytes) -> Result<StatusCode, SendError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .timeout(self.timeout)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(USER_AGENT_HEADER, USER_AGENT)
            .body(body);

        // An empty tenant means single-tenant mode: no header
        if !tenant_id.is_empty() {
            request = request.header(TENANT_HEADER, tenant_id);
        }

        request = match &self.auth {
            Some(Auth::Basic { username, password }) => request.basic_auth(username, Some(password)),
            Some(Auth::Bearer(token)) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(status);
        }

        Err(SendError::Status {
            code: status,
            message: first_line(response).await,
        })
    }
}

/// Read at most `MAX_ERR_MSG_LEN` bytes of the body and return its first line.
///
/// The result never exceeds `MAX_ERR_MSG_LEN` bytes, even when invalid UTF-8
/// is replaced while decoding.
async fn first_line(mut response: Response) -> String {
    let mut buf = Vec::with_capacity(MAX_ERR_MSG_LEN);

    while buf.len() < MAX_ERR_MSG_LEN {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(MAX_ERR_MSG_LEN - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "error reading response body");
                break;
            }
        }
    }

    first_line_of(&buf)
}

fn first_line_of(buf: &[u8]) -> String {
    let line = buf.split(|&b| b == b'\n').next().unwrap_or_default();
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let mut message = String::from_utf8_lossy(line).into_owned();
    if message.len() > MAX_ERR_MSG_LEN {
        let mut end = MAX_ERR_MSG_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

//! Public entry point: hand log lines to a background dispatcher.
//!
//! [`Client::handle`] resolves the tenant and labels of a line and passes it to
//! the dispatcher task, which batches lines per tenant and delivers them with
//! the [`Sender`]. Delivery is asynchronous: `handle` reports only whether the
//! line was accepted, and delivery failures are logged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};

use crate::batch::Entry;
use crate::config::{Config, ConfigError};
use crate::dispatcher::{dispatch_task, BatchPolicy};
use crate::model::LabelSet;
use crate::sender::Sender;

/// Label that overrides the tenant of a single line. It is removed before the
/// line is sent.
pub const RESERVED_LABEL_TENANT_ID: &str = "__tenant_id__";

/// Errors returned by [`Client`] construction and [`Client::handle`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid client configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// The client has been stopped and no longer accepts lines
    #[error("client has been stopped")]
    Stopped,
}

/// Client for pushing log lines to Loki.
///
/// Must be created inside a tokio runtime: construction spawns the dispatcher
/// task. Dropping the client without calling [`Client::stop`] still flushes
/// pending batches in the background, but nothing waits for it.
///
/// # Example
///
/// ```no_run
/// use loki_client::{Client, LabelSet};
///
/// #[tokio::main]
/// async fn main() {
///     let client = Client::with_default("http://localhost:3100/loki/api/v1/push")
///         .expect("Failed to create client");
///
///     let labels = LabelSet::from([("job", "example")]);
///     client.handle(&labels, chrono::Utc::now(), "line test 1").await.ok();
///
///     client.stop().await;
/// }
/// ```
pub struct Client {
    entries: mpsc::Sender<Entry>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    external_labels: LabelSet,
    tenant_id: Option<String>,
}

impl Client {
    /// Create a client whose logs carry a `component="client"` span with the
    /// endpoint host.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` for invalid settings and
    /// `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let span = info_span!(
            "loki_client",
            component = "client",
            host = config.url.host_str().unwrap_or_default()
        );
        Self::with_span(config, span)
    }

    /// Create a client with default settings for the given push URL.
    pub fn with_default(url: &str) -> Result<Self, ClientError> {
        Self::new(Config::new(url)?)
    }

    /// Create a client that records its logs under `span`.
    pub fn with_span(config: Config, span: Span) -> Result<Self, ClientError> {
        config.validate()?;

        let sender = Arc::new(Sender::new(&config)?);
        let policy = BatchPolicy::new(config.batch_size, config.batch_wait);

        // Capacity 1 is the closest tokio gets to a rendezvous channel
        let (tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        let dispatcher = tokio::spawn(
            dispatch_task(rx, shutdown.clone(), policy, move |tenant_id, batch| {
                let sender = sender.clone();
                async move {
                    // Outcome already logged by the sender
                    let _ = sender.send_batch(&tenant_id, batch).await;
                }
            })
            .instrument(span),
        );

        Ok(Self {
            entries: tx,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
            external_labels: config.external_labels,
            tenant_id: config.tenant_id.filter(|t| !t.is_empty()),
        })
    }

    /// Queue a log line for delivery.
    ///
    /// `labels` are layered over the configured external labels. The tenant is
    /// taken from the `__tenant_id__` label if present, else from the config;
    /// the reserved label itself is never sent. Waits until the dispatcher
    /// accepts the line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Stopped` if the client has been stopped.
    pub async fn handle(
        &self,
        labels: &LabelSet,
        timestamp: impl Into<DateTime<Utc>>,
        line: impl Into<String>,
    ) -> Result<(), ClientError> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::Stopped);
        }

        let mut labels = if self.external_labels.is_empty() {
            labels.clone()
        } else {
            self.external_labels.merge(labels)
        };

        let tenant_id = self.tenant_id(&labels);
        labels.remove(RESERVED_LABEL_TENANT_ID);

        let entry = Entry::new(tenant_id, labels, timestamp.into(), line);
        self.entries
            .send(entry)
            .await
            .map_err(|_| ClientError::Stopped)
    }

    /// Tenant of a line: the reserved label, then the configured tenant, then
    /// empty (no tenant header).
    fn tenant_id(&self, labels: &LabelSet) -> String {
        if let Some(tenant_id) = labels.get(RESERVED_LABEL_TENANT_ID) {
            return tenant_id.to_string();
        }

        self.tenant_id.clone().unwrap_or_default()
    }

    /// Stop the client and wait until every pending batch has been sent.
    ///
    /// Safe to call more than once; later calls return once the first has
    /// finished draining.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let mut dispatcher = self.dispatcher.lock().await;
        if let Some(handle) = dispatcher.take() {
            match handle.await {
                Ok(()) => info!("Loki client stopped"),
                Err(e) => warn!(error = %e, "Dispatcher task failed during shutdown"),
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> Config {
        let mut config = Config::new("http://127.0.0.1:9/loki/api/v1/push").unwrap();
        config.backoff.max_retries = 1;
        config.timeout = Duration::from_millis(200);
        config
    }

    #[tokio::test]
    async fn test_tenant_from_reserved_label() {
        let mut config = test_config();
        config.tenant_id = Some("static".to_string());
        let client = Client::new(config).unwrap();

        let labels = LabelSet::from([("job", "api"), (RESERVED_LABEL_TENANT_ID, "t1")]);
        assert_eq!(client.tenant_id(&labels), "t1");
    }

    #[tokio::test]
    async fn test_tenant_from_config() {
        let mut config = test_config();
        config.tenant_id = Some("static".to_string());
        let client = Client::new(config).unwrap();

        assert_eq!(client.tenant_id(&LabelSet::from([("job", "api")])), "static");
    }

    #[tokio::test]
    async fn test_tenant_defaults_to_empty() {
        let mut config = test_config();
        config.tenant_id = Some(String::new());
        let client = Client::new(config).unwrap();

        assert_eq!(client.tenant_id(&LabelSet::new()), "");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.batch_size = 0;

        let result = Client::new(config);
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_with_default_rejects_bad_url() {
        let result = Client::with_default("not a url");
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_handle_after_stop_fails() {
        let client = Client::new(test_config()).unwrap();
        client.stop().await;

        let result = client.handle(&LabelSet::new(), Utc::now(), "late").await;
        assert!(matches!(result, Err(ClientError::Stopped)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let client = Client::new(test_config()).unwrap();
        client.stop().await;
        client.stop().await;
    }

    #[tokio::test]
    async fn test_handle_does_not_modify_caller_labels() {
        let client = Client::new(test_config()).unwrap();
        let labels = LabelSet::from([("job", "api"), (RESERVED_LABEL_TENANT_ID, "t1")]);

        client.handle(&labels, Utc::now(), "line").await.unwrap();
        assert_eq!(labels.get(RESERVED_LABEL_TENANT_ID), Some("t1"));
        assert_eq!(labels.len(), 2);
    }
}

//! Loki Client Library
//!
//! This library batches labeled log lines per tenant and pushes them to a
//! Loki endpoint:
//!
//! - **client**: `Client::handle` / `Client::stop`, the public entry point
//! - **dispatcher**: the single task owning pending batches and flush policy
//! - **batch**: per-tenant accumulation of streams
//! - **sender**: HTTP delivery with retry and backoff
//! - **backoff**: exponential backoff with a retry budget
//! - **config**: settings with defaults and environment loading
//! - **logproto** / **model**: wire types and label sets
//!
//! # Example
//!
//! ```no_run
//! use loki_client::config::Config;
//! use loki_client::{Client, LabelSet};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let client = Client::new(config).expect("Failed to create client");
//!
//!     let labels = LabelSet::from([("job", "example"), ("__tenant_id__", "team-a")]);
//!     for i in 0..3 {
//!         client
//!             .handle(&labels, chrono::Utc::now(), format!("line {}", i))
//!             .await
//!             .expect("client stopped");
//!     }
//!
//!     // Wait for pending batches to be sent
//!     client.stop().await;
//! }
//! ```

pub mod backoff;
pub mod batch;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod logproto;
pub mod model;
pub mod sender;

// Re-export commonly used types at crate root
pub use client::{Client, ClientError, RESERVED_LABEL_TENANT_ID};
pub use config::{Config, ConfigError};
pub use model::LabelSet;

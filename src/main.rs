//! Loki Client - ship lines from stdin to Loki
//!
//! Every line read from standard input is pushed with the label
//! `job=<LOKI_JOB>` (default: `stdin`). The process stops on end of input or
//! on Ctrl+C, after sending everything still pending.
//!
//! ## Configuration
//!
//! See [`loki_client::config::Config`] for the `LOKI_*` environment variables.
//! `RUST_LOG` sets the logging level filter (default: info).

use std::env;
use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use loki_client::config::Config;
use loki_client::{Client, LabelSet};

/// Job label used when `LOKI_JOB` is not set
const DEFAULT_JOB: &str = "stdin";

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                url = %config.url,
                batch_size = config.batch_size,
                batch_wait_ms = config.batch_wait.as_millis() as u64,
                max_retries = config.backoff.max_retries,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let client = match Client::new(config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create client");
            std::process::exit(1);
        }
    };

    let job = env::var("LOKI_JOB").unwrap_or_else(|_| DEFAULT_JOB.to_string());
    let labels = LabelSet::from([("job", job)]);

    let lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    let shipped = ship_lines(&client, &labels, lines, shutdown).await;

    info!(lines = shipped, "Flushing pending batches");
    client.stop().await;
}

/// Hand every line to the client until input ends, the client stops, or
/// `shutdown` completes. Returns the number of lines accepted.
///
/// `shutdown` is polled once across the whole loop, so it is seen even while
/// `handle` waits on a dispatcher busy retrying a batch.
async fn ship_lines<R, S>(client: &Client, labels: &LabelSet, mut lines: Lines<R>, shutdown: S) -> u64
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut shipped: u64 = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping...");
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("End of input");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read from stdin");
                break;
            }
        };

        tokio::select! {
            result = client.handle(labels, chrono::Utc::now(), line) => {
                if result.is_err() {
                    break;
                }
                shipped += 1;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping...");
                break;
            }
        }
    }

    shipped
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_ship_lines_until_end_of_input() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = Client::new(Config::new(&server.uri()).unwrap()).unwrap();
        let labels = LabelSet::from([("job", "test")]);
        let input: &[u8] = b"one\ntwo\nthree\n";

        let shipped = ship_lines(&client, &labels, input.lines(), std::future::pending()).await;
        assert_eq!(shipped, 3);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_seen_while_dispatcher_retries() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        // Every line overflows the batch, and a failed push backs off for seconds
        let mut config = Config::new(&server.uri()).unwrap();
        config.batch_size = 1;
        config.backoff.min_period = Duration::from_secs(10);
        config.backoff.max_period = Duration::from_secs(20);
        config.backoff.max_retries = 2;
        let client = Client::new(config).unwrap();

        let labels = LabelSet::from([("job", "test")]);
        let input = "xx\n".repeat(100);
        let shutdown = tokio::time::sleep(Duration::from_millis(200));

        let shipped = tokio::time::timeout(
            Duration::from_secs(5),
            ship_lines(&client, &labels, input.as_bytes().lines(), shutdown),
        )
        .await
        .expect("shutdown should interrupt a blocked handle");
        assert!(shipped < 100);
    }
}

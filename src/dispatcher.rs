//! The batching loop between [`Client::handle`](crate::client::Client::handle) and the sender.
//!
//! A single task owns every pending batch. Entries arrive over an mpsc
//! channel and `tokio::select!` multiplexes them with a periodic age check
//! and the shutdown signal, so batch state never needs a lock.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::{Batch, Entry};

/// Lower bound for the age check period.
const MIN_WAIT_CHECK_FREQUENCY: Duration = Duration::from_millis(10);

/// When a pending batch must be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// A batch is sent before an entry would take it past this many line bytes
    pub max_batch_size: usize,

    /// A batch is sent once it is this old
    pub max_batch_wait: Duration,
}

impl BatchPolicy {
    pub fn new(max_batch_size: usize, max_batch_wait: Duration) -> Self {
        Self {
            max_batch_size,
            max_batch_wait,
        }
    }

    /// Period of the age check: a tenth of the max wait, at least 10ms.
    ///
    /// Batches are therefore sent at most 10% late.
    pub fn check_frequency(&self) -> Duration {
        (self.max_batch_wait / 10).max(MIN_WAIT_CHECK_FREQUENCY)
    }
}

/// Pending batches keyed by tenant, plus the callback that delivers them.
struct Dispatcher<F> {
    batches: HashMap<String, Batch>,
    policy: BatchPolicy,
    flush: F,
}

impl<F, Fut> Dispatcher<F>
where
    F: FnMut(String, Batch) -> Fut,
    Fut: Future<Output = ()>,
{
    /// Add an entry to its tenant's batch, sending the batch first if the
    /// entry would overflow it.
    async fn add_entry(&mut self, entry: Entry) {
        let size_after = self
            .batches
            .get(&entry.tenant_id)
            .map(|batch| batch.size_bytes_after(&entry));

        match size_after {
            // First entry for this tenant since its last batch was sent
            None => {
                self.batches.insert(entry.tenant_id.clone(), Batch::new([entry]));
            }

            Some(size) if size > self.policy.max_batch_size => {
                let tenant_id = entry.tenant_id.clone();
                if let Some(full) = self.batches.remove(&tenant_id) {
                    debug!(
                        tenant_id = %tenant_id,
                        size_bytes = full.size_bytes(),
                        "Size-based flush triggered"
                    );
                    (self.flush)(tenant_id.clone(), full).await;
                }
                self.batches.insert(tenant_id, Batch::new([entry]));
            }

            Some(_) => {
                if let Some(batch) = self.batches.get_mut(&entry.tenant_id) {
                    batch.add(entry);
                }
            }
        }
    }

    /// Send every batch that has reached the max wait.
    async fn flush_expired(&mut self) {
        let max_wait = self.policy.max_batch_wait;
        let expired: Vec<String> = self
            .batches
            .iter()
            .filter(|(_, batch)| batch.age() >= max_wait)
            .map(|(tenant_id, _)| tenant_id.clone())
            .collect();

        for tenant_id in expired {
            if let Some(batch) = self.batches.remove(&tenant_id) {
                debug!(
                    tenant_id = %tenant_id,
                    age_ms = batch.age().as_millis() as u64,
                    "Time-based flush triggered"
                );
                (self.flush)(tenant_id, batch).await;
            }
        }
    }

    /// Send every pending batch.
    async fn flush_all(&mut self) {
        let batches: Vec<(String, Batch)> = self.batches.drain().collect();
        for (tenant_id, batch) in batches {
            (self.flush)(tenant_id, batch).await;
        }
    }
}

/// Run the batching loop until `shutdown` fires or every sender is dropped.
///
/// `flush` is awaited inline for each batch that is ready, so a slow delivery
/// holds up the loop and batches of one tenant are always sent in order.
/// On exit, entries still queued in the channel are batched and every pending
/// batch is flushed before returning.
///
/// # Example
///
/// ```no_run
/// use loki_client::dispatcher::{dispatch_task, BatchPolicy};
/// use std::time::Duration;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let (tx, rx) = mpsc::channel(1);
///     let shutdown = CancellationToken::new();
///     let policy = BatchPolicy::new(1024 * 1024, Duration::from_secs(1));
///
///     tokio::spawn(dispatch_task(rx, shutdown.clone(), policy, |tenant_id, batch| async move {
///         println!("{} entries for tenant '{}'", batch.entry_count(), tenant_id);
///     }));
///     # drop(tx);
/// }
/// ```
pub async fn dispatch_task<F, Fut>(
    mut rx: mpsc::Receiver<Entry>,
    shutdown: CancellationToken,
    policy: BatchPolicy,
    flush: F,
) where
    F: FnMut(String, Batch) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut dispatcher = Dispatcher {
        batches: HashMap::new(),
        policy,
        flush,
    };

    let mut max_wait_check = interval(policy.check_frequency());
    max_wait_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first immediate tick
    max_wait_check.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = max_wait_check.tick() => dispatcher.flush_expired().await,

            maybe_entry = rx.recv() => match maybe_entry {
                Some(entry) => dispatcher.add_entry(entry).await,
                None => break,
            },
        }
    }

    // Accept nothing new, but keep what was already handed over
    rx.close();
    while let Some(entry) = rx.recv().await {
        dispatcher.add_entry(entry).await;
    }

    info!(
        pending_batches = dispatcher.batches.len(),
        "Dispatcher stopping, flushing pending batches"
    );
    dispatcher.flush_all().await;
}

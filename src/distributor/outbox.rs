//! The control-plane half of the outbox pattern.

use crate::bus::{Headers, MessageBus};
use crate::core::OutboxMessage;
use crate::ledger::{ChangeLedger, LedgerError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Outcome of one pass over the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub published: usize,
    pub failed: usize,
    /// Rows held back because an older row for the same route failed.
    pub deferred: usize,
}

/// Periodically publishes pending outbox rows.
///
/// A row is deleted only after the bus has confirmed it; a failed or timed
/// out publish leaves it for the next pass, so nothing is ever dropped. Once
/// a row fails, later rows for the same route key wait for the next pass too,
/// so each queue still receives its changes oldest first.
pub struct OutboxPoller {
    ledger: Arc<dyn ChangeLedger>,
    bus: Arc<dyn MessageBus>,
    ack_queue: String,
    batch_size: usize,
    poll_interval: Duration,
    publish_timeout: Duration,
}

impl OutboxPoller {
    pub fn new(
        ledger: Arc<dyn ChangeLedger>,
        bus: Arc<dyn MessageBus>,
        ack_queue: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            bus,
            ack_queue: ack_queue.into(),
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    /// Polls until shutdown is signalled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Outbox poller started"
        );
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Outbox poller received shutdown signal.");
                    break;
                }
                _ = ticker.tick() => {
                    match self.drain(Some(&shutdown_rx)).await {
                        Ok(stats) if stats.published + stats.failed > 0 => {
                            debug!(
                                published = stats.published,
                                failed = stats.failed,
                                deferred = stats.deferred,
                                "Outbox pass complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Outbox pass failed; retrying next tick"),
                    }
                }
            }
        }
    }

    /// Publishes one batch of pending rows.
    pub async fn poll_once(&self) -> Result<PollStats, LedgerError> {
        self.drain(None).await
    }

    async fn drain(&self, shutdown_rx: Option<&watch::Receiver<bool>>) -> Result<PollStats, LedgerError> {
        let rows = self.ledger.pending_outbox(self.batch_size).await?;
        let mut stats = PollStats::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for row in rows {
            if shutdown_rx.is_some_and(|rx| *rx.borrow()) {
                debug!("Shutdown requested; leaving remaining outbox rows for later");
                break;
            }
            if blocked.contains(&row.route_key) {
                stats.deferred += 1;
                continue;
            }
            if self.publish(&row).await {
                self.ledger.mark_published(row.id).await?;
                stats.published += 1;
            } else {
                stats.failed += 1;
                blocked.insert(row.route_key.clone());
            }
        }
        Ok(stats)
    }

    #[instrument(skip_all, fields(change_id = %row.change_id, server_id = %row.server_id, route_key = %row.route_key))]
    async fn publish(&self, row: &OutboxMessage) -> bool {
        let headers = Headers {
            host: row.server_id.clone(),
            reply_to: Some(self.ack_queue.clone()),
        };
        let publish = self.bus.publish(&row.route_key, headers, row.payload.clone());

        match timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => {
                metrics::counter!("outbox_published_total").increment(1);
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Publish failed; row stays pending");
                metrics::counter!("outbox_publish_failures_total").increment(1);
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "Publish timed out; row stays pending"
                );
                metrics::counter!("outbox_publish_failures_total").increment(1);
                false
            }
        }
    }
}

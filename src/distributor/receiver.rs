//! The resolver half: apply delivered changes and acknowledge them.

use crate::bus::{Delivery, HandlerError, Headers, MessageBus, MessageHandler};
use crate::core::{AckMessage, Change, ChangeId, ServerId};
use crate::resolver::{ApplyOutcome, ChangeApplier};
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Consumes a resolver's queue.
///
/// Each delivery is decoded, applied through the [`ChangeApplier`] and, once
/// the store commit succeeded, acknowledged to the delivery's `reply_to`
/// queue. Change IDs applied recently are remembered, so a redelivered change
/// is acknowledged again without touching the store. A change that is older
/// than what the store already holds for its zone or rule is acknowledged
/// without being applied.
pub struct ChangeReceiver {
    server_id: ServerId,
    applier: Arc<ChangeApplier>,
    bus: Arc<dyn MessageBus>,
    applied: Cache<ChangeId, ()>,
}

impl ChangeReceiver {
    pub fn new(
        server_id: impl Into<ServerId>,
        applier: Arc<ChangeApplier>,
        bus: Arc<dyn MessageBus>,
        cache_size: u64,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            applier,
            bus,
            applied: Cache::builder()
                .max_capacity(cache_size)
                .time_to_live(cache_ttl)
                .build(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn apply(&self, change: &Change) -> Result<(), HandlerError> {
        if self.applied.contains_key(&change.id) {
            debug!(change_id = %change.id, "Change already applied; acknowledging again");
            metrics::counter!("changes_applied_total", "outcome" => "duplicate").increment(1);
            return Ok(());
        }

        // A commit that has started always runs to completion, even if this
        // handler is cancelled mid-way.
        let applier = self.applier.clone();
        let owned = change.clone();
        let result = tokio::task::spawn_blocking(move || applier.apply(&owned))
            .await
            .map_err(|e| HandlerError::Retryable(format!("apply task failed: {}", e)))?;

        match result {
            Ok(ApplyOutcome::Applied) => {
                self.applied.insert(change.id, ()).await;
                metrics::counter!("changes_applied_total", "outcome" => "applied").increment(1);
                Ok(())
            }
            Ok(ApplyOutcome::Stale { last_applied }) => {
                debug!(change_id = %change.id, %last_applied, "Skipping change older than applied state");
                self.applied.insert(change.id, ()).await;
                metrics::counter!("changes_applied_total", "outcome" => "stale").increment(1);
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                warn!(change_id = %change.id, zone = %change.subject(), error = %e, "Apply failed; requesting redelivery");
                metrics::counter!("changes_applied_total", "outcome" => "retry").increment(1);
                Err(HandlerError::Retryable(e.to_string()))
            }
            Err(e) => {
                error!(change_id = %change.id, zone = %change.subject(), error = %e, "Rejecting change");
                metrics::counter!("changes_applied_total", "outcome" => "rejected").increment(1);
                Err(HandlerError::NonRetryable(e.to_string()))
            }
        }
    }

    async fn acknowledge(&self, change_id: ChangeId, reply_to: &str) -> Result<(), HandlerError> {
        let ack = AckMessage {
            change_id,
            server_id: self.server_id.clone(),
        };
        let payload = ack
            .encode()
            .map_err(|e| HandlerError::NonRetryable(e.to_string()))?;
        let headers = Headers {
            host: self.server_id.clone(),
            reply_to: None,
        };
        self.bus
            .publish(reply_to, headers, payload)
            .await
            .map_err(|e| {
                warn!(change_id = %change_id, error = %e, "Failed to publish ack; requesting redelivery");
                HandlerError::Retryable(e.to_string())
            })
    }
}

#[async_trait]
impl MessageHandler for ChangeReceiver {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let change = Change::decode(&delivery.payload).map_err(|e| {
            warn!(queue = %delivery.queue, error = %e, "Dropping undecodable change");
            metrics::counter!("changes_applied_total", "outcome" => "poison").increment(1);
            HandlerError::NonRetryable(e.to_string())
        })?;

        if !delivery.headers.host.is_empty() && delivery.headers.host != self.server_id {
            warn!(
                change_id = %change.id,
                host = %delivery.headers.host,
                server_id = %self.server_id,
                "Change addressed to another host"
            );
        }

        self.apply(&change).await?;

        match &delivery.headers.reply_to {
            Some(reply_to) => self.acknowledge(change.id, reply_to).await,
            None => {
                warn!(change_id = %change.id, "Delivery has no reply_to; cannot acknowledge");
                Ok(())
            }
        }
    }
}

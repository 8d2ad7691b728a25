use crate::bus::{Delivery, HandlerError, MessageHandler};
use crate::core::{AckMessage, TargetStatus};
use crate::ledger::{ChangeLedger, StatusUpdate};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Marks targets INSYNC as resolver acknowledgments arrive.
pub struct AckListener {
    ledger: Arc<dyn ChangeLedger>,
}

impl AckListener {
    pub fn new(ledger: Arc<dyn ChangeLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl MessageHandler for AckListener {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let ack = AckMessage::decode(&delivery.payload).map_err(|e| {
            warn!(queue = %delivery.queue, error = %e, "Dropping undecodable acknowledgment");
            HandlerError::NonRetryable(e.to_string())
        })?;

        match self
            .ledger
            .update_change_target_status(ack.change_id, &ack.server_id, TargetStatus::InSync)
            .await
        {
            Ok(StatusUpdate::Advanced) => {
                debug!(change_id = %ack.change_id, server_id = %ack.server_id, "Target in sync");
                metrics::counter!("acks_processed_total").increment(1);
                Ok(())
            }
            Ok(StatusUpdate::Unchanged) => {
                debug!(change_id = %ack.change_id, server_id = %ack.server_id, "Duplicate acknowledgment");
                Ok(())
            }
            Err(e) if e.is_transient() => Err(HandlerError::Retryable(e.to_string())),
            Err(e) => {
                warn!(change_id = %ack.change_id, server_id = %ack.server_id, error = %e, "Acknowledgment for unknown target");
                Err(HandlerError::NonRetryable(e.to_string()))
            }
        }
    }
}

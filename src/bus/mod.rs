//! The message bus contract used to move changes and acknowledgments.
//!
//! The bus routes a published message to a queue named by its route key and
//! delivers it at least once. Handlers classify failures: a retryable error
//! requeues the message, a non-retryable one drops it.

pub mod memory;

pub use memory::MemoryBus;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("message bus unavailable: {0}")]
    Unavailable(String),

    #[error("no queue bound to route key '{0}'")]
    Unroutable(String),

    #[error("queue '{0}' closed")]
    Closed(String),
}

/// Failure classification returned by a [`MessageHandler`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Nack with requeue; the bus will redeliver.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Nack without requeue; the message is dropped.
    #[error("non-retryable: {0}")]
    NonRetryable(String),
}

/// Routing metadata carried alongside every payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    /// Destination server ID.
    pub host: String,
    /// Queue that acknowledgments should be published to.
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub headers: Headers,
    pub payload: Vec<u8>,
    /// Set when this message was requeued after a retryable failure.
    pub redelivered: bool,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// `Ok(())` acknowledges the delivery.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes and returns once the bus has accepted the message.
    async fn publish(&self, route_key: &str, headers: Headers, payload: Vec<u8>) -> Result<(), BusError>;

    /// Feeds every delivery on `queue` to `handler` until shutdown is signalled.
    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), BusError>;
}

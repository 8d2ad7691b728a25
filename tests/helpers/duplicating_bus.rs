//! A bus wrapper that delivers every published message twice.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use zonesync::bus::{BusError, Headers, MemoryBus, MessageBus, MessageHandler};

pub struct DuplicatingBus {
    inner: Arc<MemoryBus>,
    published: AtomicUsize,
}

impl DuplicatingBus {
    pub fn new(inner: Arc<MemoryBus>) -> Self {
        Self {
            inner,
            published: AtomicUsize::new(0),
        }
    }

    /// Messages accepted by the wrapped bus, duplicates included.
    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for DuplicatingBus {
    async fn publish(&self, route_key: &str, headers: Headers, payload: Vec<u8>) -> Result<(), BusError> {
        self.inner.publish(route_key, headers.clone(), payload.clone()).await?;
        self.inner.publish(route_key, headers, payload).await?;
        self.published.fetch_add(2, Ordering::SeqCst);
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        self.inner.consume(queue, handler, shutdown_rx).await
    }
}

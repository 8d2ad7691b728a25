//! An in-process [`MessageBus`] backed by one `async_channel` per queue.
//!
//! Route keys name queues directly. Publishing to a queue nobody declared is
//! an error rather than a silent drop, so a misconfigured route surfaces as a
//! publish failure and the outbox row stays pending.

use super::{BusError, Delivery, HandlerError, Headers, MessageBus, MessageHandler};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

#[derive(Clone)]
struct Queue {
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
}

pub struct MemoryBus {
    queues: RwLock<HashMap<String, Queue>>,
    available: AtomicBool,
    redelivery_delay: Duration,
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("redelivery_delay", &self.redelivery_delay)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl MemoryBus {
    pub fn new(redelivery_delay: Duration) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            redelivery_delay,
        }
    }

    /// Creates `name` if it does not exist yet. Declaring twice is harmless.
    pub fn declare_queue(&self, name: &str) {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        queues.entry(name.to_string()).or_insert_with(|| {
            debug!(queue = name, "Declaring queue");
            let (tx, rx) = async_channel::unbounded();
            Queue { tx, rx }
        });
    }

    /// Number of messages waiting on `name`.
    pub fn queue_len(&self, name: &str) -> usize {
        self.queue(name).map_or(0, |q| q.rx.len())
    }

    /// Makes every publish fail (or succeed again) to simulate a broker outage.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn queue(&self, name: &str) -> Option<Queue> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn requeue(&self, tx: Sender<Delivery>, mut delivery: Delivery) {
        delivery.redelivered = true;
        let delay = self.redelivery_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(delivery).await.is_err() {
                warn!("Queue closed before a retryable message could be requeued");
            }
        });
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, route_key: &str, headers: Headers, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("broker connection lost".to_string()));
        }
        let queue = self
            .queue(route_key)
            .ok_or_else(|| BusError::Unroutable(route_key.to_string()))?;

        let delivery = Delivery {
            queue: route_key.to_string(),
            headers,
            payload,
            redelivered: false,
        };
        queue
            .tx
            .send(delivery)
            .await
            .map_err(|_| BusError::Closed(route_key.to_string()))?;
        trace!(route_key, "Message published");
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        self.declare_queue(queue);
        let Queue { tx, rx } = self
            .queue(queue)
            .ok_or_else(|| BusError::Closed(queue.to_string()))?;
        info!(queue, "Consumer started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let delivery = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!(queue, "Consumer received shutdown signal.");
                    break;
                }
                result = rx.recv() => match result {
                    Ok(delivery) => delivery,
                    Err(_) => return Err(BusError::Closed(queue.to_string())),
                },
            };

            match handler.handle(&delivery).await {
                Ok(()) => trace!(queue, "Delivery acknowledged"),
                Err(HandlerError::Retryable(reason)) => {
                    debug!(queue, %reason, "Delivery nacked; requeueing");
                    self.requeue(tx.clone(), delivery);
                }
                Err(HandlerError::NonRetryable(reason)) => {
                    warn!(queue, %reason, "Delivery rejected; dropping message");
                }
            }
        }
        Ok(())
    }
}

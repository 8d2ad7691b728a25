//! Manages the lifecycle of all spawned tasks in the application.
use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A centralized manager for all spawned tasks.
///
/// Every long-running loop (outbox poller, consumers, purger, metrics server)
/// is spawned through here and observes the shared shutdown channel;
/// [`TaskManager::shutdown`] then waits for all of them to finish.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(String, JoinHandle<()>)>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns a new task and tracks its handle.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(task_name = %name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    /// Returns a clone of the shutdown receiver.
    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Number of tasks spawned and not yet awaited.
    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for all managed tasks to complete.
    pub async fn shutdown(self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        info!("TaskManager shutting down. Waiting for {} tasks to complete...", handles.len());

        let (names, handles): (Vec<String>, Vec<JoinHandle<()>>) = handles.into_iter().unzip();
        debug!(tasks = ?names, "Awaiting all tasks.");

        let results = join_all(handles).await;

        let mut panicked = 0;
        for (task_name, result) in names.iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name = %task_name, "Task shut down gracefully."),
                Err(e) => {
                    error!(task_name = %task_name, error = %e, "Task panicked during shutdown.");
                    panicked += 1;
                }
            }
        }

        if panicked > 0 {
            error!("{} tasks panicked during shutdown", panicked);
        } else {
            info!("All tasks shut down gracefully.");
        }
    }
}

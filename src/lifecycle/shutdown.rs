//! Shutdown coordination for background tasks.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Background loops (network monitoring, credential wipes) subscribe to a
/// broadcast channel and exit when it fires.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Spawn a task that receives its own shutdown subscription.
    pub fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.subscribe()));
        self.tasks
            .lock()
            .expect("shutdown task list poisoned")
            .push((name, handle));
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Trigger shutdown and wait up to `deadline` for spawned tasks. Tasks
    /// still running afterwards are aborted; returns how many.
    pub async fn shutdown(&self, deadline: Duration) -> usize {
        self.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("shutdown task list poisoned"));

        let mut aborted = 0;
        for (name, mut handle) in tasks {
            match tokio::time::timeout(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "Background task failed"),
                Err(_) => {
                    tracing::warn!(task = name, "Background task missed shutdown deadline, aborting");
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

// Task helpers shared by all long-lived loops.
//
// Every loop in the daemon is spawned through here so a panic in one
// chain's task never takes down the process: the panic is logged and
// the task is restarted after a short delay.

use std::{future::Future, time::Duration};

use log::{debug, error, info};
use tokio::{sync::watch, task::JoinHandle, time::sleep};

// Delay before restarting a task that panicked
const RESTART_DELAY_SECS: u64 = 5;

// Spawn a named task
pub fn spawn_task<F>(name: &'static str, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    debug!("Spawning task '{}'", name);
    tokio::spawn(future)
}

// Spawn a task that is restarted after a short delay if it panics.
// The task ends for good once the shutdown signal flips or the
// future returns Ok.
pub fn spawn_restartable_task<F, Fut>(
    name: &'static str,
    mut shutdown: ShutdownReceiver,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let inner = tokio::spawn(factory());
            match inner.await {
                Ok(Ok(())) => {
                    debug!("Task '{}' completed", name);
                    break;
                }
                Ok(Err(e)) => {
                    error!("Task '{}' exited with error: {:#}", name, e);
                }
                Err(e) if e.is_panic() => {
                    error!("Task '{}' panicked, restarting in {}s", name, RESTART_DELAY_SECS);
                }
                Err(_) => {
                    // cancelled
                    break;
                }
            }

            tokio::select! {
                _ = sleep(Duration::from_secs(RESTART_DELAY_SECS)) => {},
                _ = shutdown.recv() => break,
            }
        }
        info!("Task '{}' stopped", name);
    })
}

// Process-wide shutdown signal.
// Cloneable receivers let every task select on cancellation.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ShutdownReceiver {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> ShutdownReceiver {
        ShutdownReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    // Flip the signal, waking every receiver
    pub fn shutdown(&self) {
        // Err only when no receiver is left, nothing to wake then
        let _ = self.sender.send(true);
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownReceiver {
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    // Wait until the signal flips
    pub async fn recv(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                // sender dropped, treat as shutdown
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_wakes_receiver() {
        let signal = ShutdownSignal::new();
        let mut receiver = signal.subscribe();
        assert!(!receiver.is_shutdown());

        signal.shutdown();
        receiver.recv().await;
        assert!(receiver.is_shutdown());
    }

    #[tokio::test]
    async fn test_restartable_task_stops_on_ok() {
        let signal = ShutdownSignal::new();
        let handle = spawn_restartable_task("test", signal.subscribe(), || async { Ok(()) });
        handle.await.unwrap();
    }
}

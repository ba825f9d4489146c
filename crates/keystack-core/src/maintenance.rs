//! Background maintenance sweep

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::registry::StackRegistry;

/// Handle to a running maintenance task
///
/// The task stops on [`shutdown`](MaintenanceHandle::shutdown) or when the
/// handle is dropped.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Sweep every structure in `registry` once per `interval`
    ///
    /// The first sweep happens one full interval after spawning. Requires a
    /// Tokio runtime.
    pub fn spawn(registry: Arc<StackRegistry>, interval: Duration) -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Configuration(
                "maintenance task requires a Tokio runtime".into(),
            ));
        }
        if interval.is_zero() {
            return Err(Error::Configuration(
                "maintenance interval must be positive".into(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(registry, interval, shutdown_rx));
        debug!(interval_ms = interval.as_millis() as u64, "maintenance task started");

        Ok(Self {
            shutdown_tx,
            task: Some(task),
        })
    }

    /// Whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the task and wait for an in-flight sweep to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "maintenance task ended abnormally");
            }
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run(registry: Arc<StackRegistry>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match registry.maintenance_all().await {
                    Ok(removed) if removed > 0 => debug!(removed, "maintenance sweep"),
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "maintenance sweep failed"),
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    debug!("maintenance task stopped");
}

//! Connection liveness for long-running remote commands
//!
//! Intermediate network devices drop SSH connections that look idle while a
//! quiet script runs. [`KeepAlive`] sends a protocol-level keep-alive request on
//! a fixed period until it is stopped or dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

use crate::error::ExecError;

/// Default period between keep-alive requests
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Something a keep-alive request can be sent over
#[async_trait]
pub trait KeepAliveTarget: Send + Sync + 'static {
    async fn send_keepalive(&self) -> Result<(), ExecError>;
}

/// Handle to a running keep-alive task
///
/// Dropping the handle signals the task to stop, so every exit path of the
/// owning scope ends it.
#[derive(Debug)]
pub struct KeepAlive {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<u64>>,
}

impl KeepAlive {
    /// Start sending keep-alives every `period`, first one after one full period
    pub fn spawn(target: Arc<dyn KeepAliveTarget>, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sent = 0u64;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = target.send_keepalive().await {
                            debug!(error = %e, "keep-alive failed, connection gone");
                            break;
                        }
                        sent += 1;
                    }
                }
            }

            debug!(sent, "keep-alive task finished");
            sent
        });

        Self {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Stop the task and wait for it, returning how many keep-alives were sent
    pub async fn stop(mut self) -> u64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.take() {
            Some(task) => task.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

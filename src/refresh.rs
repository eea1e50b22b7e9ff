//! Background forecast refresh
//!
//! Periodically resolves one forecast request on a tokio task and reports the
//! outcome over a channel, so callers never block on file or network I/O.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::data::{ForecastRequest, WeatherRecord};
use crate::fetch::FetchGate;

/// Messages sent from the background refresh to the caller
#[derive(Debug, Clone)]
pub enum RefreshMessage {
    /// Refresh started
    RefreshStarted,
    /// Fresh or cached records for the request
    WeatherUpdated(Vec<WeatherRecord>),
    /// An error occurred during refresh
    RefreshError(String),
    /// Refresh completed
    RefreshCompleted,
}

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between refreshes
    pub interval: Duration,
    /// Whether to refresh as soon as the task starts
    pub run_immediately: bool,
    /// Whether auto-refresh is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300), // 5 minutes
            run_immediately: false,
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    /// Spawns the refresh task for `request`
    ///
    /// # Arguments
    /// * `gate` - Fetch gate shared with other callers
    /// * `request` - The request to resolve on every tick
    /// * `config` - Refresh interval and switches
    pub fn spawn(gate: Arc<FetchGate>, request: ForecastRequest, config: RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = config.enabled.then(|| {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                if !config.run_immediately {
                    // The first tick completes immediately
                    interval.tick().await;
                }

                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        Some(()) = trigger_rx.recv() => {}
                        _ = shutdown_rx.recv() => break,
                    }

                    if msg_tx.send(RefreshMessage::RefreshStarted).await.is_err() {
                        break;
                    }

                    // Shutdown drops the in-flight resolve; the gate leaves the cache intact
                    let outcome = tokio::select! {
                        result = gate.resolve(&request) => result,
                        _ = shutdown_rx.recv() => {
                            tracing::debug!("forecast refresh cancelled");
                            break;
                        }
                    };

                    let message = match outcome {
                        Ok(records) => RefreshMessage::WeatherUpdated(records),
                        Err(e) => {
                            tracing::warn!(error = %e, "forecast refresh failed");
                            RefreshMessage::RefreshError(e.to_string())
                        }
                    };

                    if msg_tx.send(message).await.is_err()
                        || msg_tx.send(RefreshMessage::RefreshCompleted).await.is_err()
                    {
                        break;
                    }
                }
            })
        });

        Self {
            receiver: msg_rx,
            trigger_tx,
            shutdown_tx,
            task,
        }
    }

    /// Requests an immediate refresh
    ///
    /// A request made while one is already pending is merged into it.
    pub async fn request_refresh(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Shuts down the background task, cancelling a refresh in flight
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Checks for pending refresh messages without blocking
///
/// # Arguments
/// * `handle` - The RefreshHandle to check
///
/// # Returns
/// * `Some(RefreshMessage)` if a message was available
/// * `None` if no messages are pending
pub fn try_recv(handle: &mut RefreshHandle) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}

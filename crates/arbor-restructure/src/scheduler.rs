//! Background reconcile scheduling
//!
//! Sweeps run on a fixed period, starting after a startup delay so the host
//! has time to report its tabs. Tab-destroyed triggers also schedule a sweep
//! once they have been quiet for the debounce window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::reconcile::{ReconcileReport, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub interval: Duration,
    pub debounce: Duration,
    pub startup_delay: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            debounce: Duration::from_millis(500),
            startup_delay: Duration::from_secs(2),
        }
    }
}

type RunCallback = Arc<dyn Fn(&ReconcileReport) + Send + Sync>;

pub struct ReconcileScheduler {
    reconciler: Reconciler,
    settings: ReconcileSettings,
    on_run: Option<RunCallback>,
}

impl ReconcileScheduler {
    pub fn new(reconciler: Reconciler, settings: ReconcileSettings) -> Self {
        Self {
            reconciler,
            settings,
            on_run: None,
        }
    }

    /// Called after every sweep with its report.
    pub fn on_run(mut self, callback: impl Fn(&ReconcileReport) + Send + Sync + 'static) -> Self {
        self.on_run = Some(Arc::new(callback));
        self
    }

    /// Start the sweep task on the current tokio runtime.
    pub fn spawn(self, triggers: mpsc::UnboundedReceiver<()>) -> ReconcileHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(triggers, shutdown_rx));
        ReconcileHandle { shutdown, task }
    }

    async fn run(
        self,
        mut triggers: mpsc::UnboundedReceiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = self.settings.interval.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(Instant::now() + self.settings.startup_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut triggers_open = true;

        tracing::debug!(
            interval_ms = period.as_millis() as u64,
            startup_delay_ms = self.settings.startup_delay.as_millis() as u64,
            "Reconcile scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.sweep("interval"),
                received = triggers.recv(), if triggers_open => {
                    if received.is_none() {
                        triggers_open = false;
                        continue;
                    }
                    match settle(&mut triggers, &mut shutdown, self.settings.debounce).await {
                        Settled::Quiet => {}
                        Settled::Closed => triggers_open = false,
                        Settled::Shutdown => break,
                    }
                    self.sweep("tab destroyed");
                }
            }
        }

        tracing::debug!("Reconcile scheduler stopped");
    }

    fn sweep(&self, reason: &'static str) {
        tracing::trace!(reason, "Running reconcile sweep");
        let report = self.reconciler.run_once();
        if let Some(callback) = &self.on_run {
            callback(&report);
        }
    }
}

enum Settled {
    Quiet,
    Closed,
    Shutdown,
}

/// Wait until no trigger has arrived for `quiet`, or bail out on shutdown.
async fn settle(
    triggers: &mut mpsc::UnboundedReceiver<()>,
    shutdown: &mut watch::Receiver<bool>,
    quiet: Duration,
) -> Settled {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Settled::Shutdown,
            received = time::timeout(quiet, triggers.recv()) => match received {
                Ok(Some(())) => continue,
                Ok(None) => return Settled::Closed,
                Err(_) => return Settled::Quiet,
            },
        }
    }
}

pub struct ReconcileHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcileHandle {
    pub async fn stop(self) {
        // Send only fails if the task already exited
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Reconcile task ended abnormally");
        }
    }
}

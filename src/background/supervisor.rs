use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::kind::Liveness;
use crate::lifecycle::Lifecycle;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub checked: usize,
    pub healthy: usize,
    pub relaunched: usize,
    pub failed: usize,
}

/// Periodically probes every running instance and relaunches the ones that
/// are down.
pub struct Supervisor {
    lifecycle: Lifecycle,
    interval: Duration,
}

impl Supervisor {
    pub fn new(lifecycle: Lifecycle, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.interval);
        // First tick fires immediately; the start-up sweep already ran.
        ticker.tick().await;
        info!("supervisor: checking every {}s", self.interval.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_pass().await;
                    tracing::debug!("supervisor pass: {report:?}");
                }
                _ = shutdown_rx.recv() => {
                    info!("supervisor: shutdown signal received");
                    break;
                }
            }
        }
    }

    /// Single pass over all running instances. A failure on one instance is
    /// logged and never stops the pass.
    pub async fn run_pass(&self) -> PassReport {
        let mut report = PassReport::default();

        let instances = match self.lifecycle.running_instances() {
            Ok(i) => i,
            Err(e) => {
                error!("supervisor: failed to load running instances: {e}");
                return report;
            }
        };

        for instance in instances {
            report.checked += 1;

            let reason = match self.lifecycle.probe(&instance).await {
                Liveness::Alive => {
                    report.healthy += 1;
                    continue;
                }
                Liveness::Down { reason } => reason,
            };

            warn!(
                "supervisor: '{}' (#{}) is down: {reason}; relaunching",
                instance.name, instance.id
            );
            match self.lifecycle.repair(instance.id, instance.pid()).await {
                Ok(Some(updated)) => {
                    report.relaunched += 1;
                    info!(
                        "supervisor: '{}' relaunched as PID {} (restart #{})",
                        updated.name,
                        updated.pid().unwrap_or_default(),
                        updated.restart_count
                    );
                }
                Ok(None) => {
                    info!("supervisor: '{}' changed underneath us, skipped", instance.name);
                }
                Err(e) => {
                    report.failed += 1;
                    error!("supervisor: relaunch of '{}' failed: {e}", instance.name);
                }
            }
        }

        report
    }
}

//! Background task that hands expired reservations back to their lots.

use crate::metrics;
use bilheteria_core::ledger::InventoryLedger;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically runs [`InventoryLedger::expire_stale`].
#[derive(Clone)]
pub struct ExpirySweeper {
    ledger: InventoryLedger,
    interval: Duration,
}

impl ExpirySweeper {
    /// Sweeper running every `interval`; a zero interval becomes one second.
    #[must_use]
    pub fn new(ledger: InventoryLedger, interval: Duration) -> Self {
        let interval = if interval.is_zero() { Duration::from_secs(1) } else { interval };
        Self { ledger, interval }
    }

    /// One pass. Store failures are logged and count as zero; the next tick
    /// retries.
    pub async fn sweep_once(&self) -> usize {
        match self.ledger.expire_stale().await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count, "Expired stale reservations");
                }
                metrics::record_reservations_expired(count);
                count
            }
            Err(error) => {
                tracing::error!(error = %error, "Expiry sweep failed");
                0
            }
        }
    }

    /// Sweeps until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    /// Runs the sweeper on its own task.
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

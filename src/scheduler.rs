//! Periodic driver of reporting cycles
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::pipeline::Exporter;
use crate::stats::ExportStats;

/// Starts one cycle per interval, never two at once.
///
/// A tick that arrives while the previous cycle is still running is
/// skipped and counted. Cancelling the shutdown token stops the timer,
/// abandons pending retries of the in-flight cycle and gives its
/// outstanding calls at most the grace period to finish.
pub struct Scheduler {
    exporter: Arc<Exporter>,
    interval: Duration,
    grace: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(exporter: Arc<Exporter>, interval: Duration, grace: Duration) -> Self {
        Self {
            exporter,
            interval,
            grace,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(exporter: Arc<Exporter>, config: &BridgeConfig) -> Self {
        Self::new(exporter, config.report_interval(), config.shutdown_grace())
    }

    /// Token that stops the scheduler when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested
    pub async fn run(self) {
        let stats = Arc::clone(self.exporter.stats());
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        info!("Reporting every {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|handle| !handle.is_finished()) {
                        ExportStats::incr(&stats.cycles_skipped);
                        warn!("Previous reporting cycle still running, skipping this tick");
                        continue;
                    }

                    let exporter = Arc::clone(&self.exporter);
                    let cancel = self.shutdown.child_token();
                    in_flight = Some(tokio::spawn(async move {
                        // failures are logged and counted by the exporter
                        let _ = exporter.run_cycle(&cancel).await;
                    }));
                }
            }
        }

        info!("Shutdown requested, no further cycles will start");
        if let Some(mut handle) = in_flight {
            if !handle.is_finished() {
                debug!("Waiting up to {:?} for the running cycle", self.grace);
                if time::timeout(self.grace, &mut handle).await.is_err() {
                    warn!(
                        "Reporting cycle did not finish within {:?}, abandoning it",
                        self.grace
                    );
                    handle.abort();
                    // the aborted cycle settles its books when dropped
                    let _ = handle.await;
                }
            }
        }
        info!("Scheduler stopped");
    }
}

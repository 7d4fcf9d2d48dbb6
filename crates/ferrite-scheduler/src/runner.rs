//! Interval loop driving scheduling ticks for one pipeline.

use crate::scheduler::Scheduler;
use ferrite_core::ids::PipelineId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

/// Runs a scheduling tick for one pipeline on an interval until shutdown.
/// Tick failures are logged; the next tick retries.
pub struct Runner {
    scheduler: Arc<Scheduler>,
    pipeline: PipelineId,
    interval: Duration,
}

impl Runner {
    pub fn new(scheduler: Arc<Scheduler>, pipeline: PipelineId, tick_interval: Duration) -> Self {
        Self {
            scheduler,
            pipeline,
            interval: tick_interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);

        info!(
            pipeline = %self.pipeline,
            interval_secs = self.interval.as_secs(),
            "Starting scheduler loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scheduler.schedule(self.pipeline, self.interval).await {
                        error!(pipeline = %self.pipeline, error = %e, "Scheduling tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(pipeline = %self.pipeline, "Scheduler loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}

use crate::clock::Clock;
use crate::error::WebhookError;
use crate::outbound::webhook::delivery_worker::DeliveryWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use webhook_events::EventStore;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_BATCH_SIZE: usize = 50;

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub selected: usize,
    pub delivered: usize,
}

/// Periodically re-drives `FAILED` events whose backoff has elapsed.
///
/// Events in a batch are delivered one after another.
pub struct RetryScheduler {
    events: Arc<dyn EventStore>,
    worker: Arc<DeliveryWorker>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl RetryScheduler {
    pub fn new(
        events: Arc<dyn EventStore>,
        worker: Arc<DeliveryWorker>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            events,
            worker,
            clock,
            batch_size,
        }
    }

    /// One sweep: load up to `batch_size` due events and attempt each.
    pub async fn run_once(&self) -> Result<SweepReport, WebhookError> {
        let due = self
            .events
            .due_for_retry(self.clock.now(), self.batch_size)
            .await?;
        let mut report = SweepReport {
            selected: due.len(),
            delivered: 0,
        };
        if due.is_empty() {
            return Ok(report);
        }

        debug!(count = due.len(), "Processing due retries");
        for event in due {
            match self.worker.deliver(event.id).await {
                Ok(true) => report.delivered += 1,
                Ok(false) => {}
                Err(e) => warn!(event_id = %event.id, error = %e, "Retry attempt errored"),
            }
        }
        Ok(report)
    }

    /// Spawn the periodic sweep.
    pub fn start(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        info!(interval_secs = every.as_secs(), "Retry scheduler starting");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "Retry sweep failed");
                }
            }
        })
    }
}

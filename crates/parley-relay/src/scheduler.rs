//! Periodic redelivery of undelivered messages.
//!
//! Every tick fetches the store's undelivered messages and pushes each one to
//! the connections online at that moment, except the author's, which already
//! saw the live echo. A message is marked delivered as soon as one of those
//! writes succeeds; with nobody else online it stays pending and is retried
//! on the next tick, forever. There is no backoff.
//!
//! Delivery is tracked per message, not per recipient: one successful write
//! marks the message delivered for everyone. The live broadcast path applies
//! the same rule.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::router::BroadcastRouter;
use crate::store::MessageStore;
use crate::types::MessageId;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Undelivered messages fetched from the store
    pub fetched: usize,
    /// Messages reaching at least one connection and now marked delivered
    pub delivered: Vec<MessageId>,
    /// Messages left pending for the next tick
    pub pending: usize,
}

pub struct RedeliveryScheduler {
    store: Arc<dyn MessageStore>,
    router: BroadcastRouter,
    period: Duration,
}

impl RedeliveryScheduler {
    pub fn new(store: Arc<dyn MessageStore>, router: BroadcastRouter, period: Duration) -> Self {
        Self {
            store,
            router,
            period,
        }
    }

    /// Run one redelivery pass.
    pub async fn tick(&self) -> Result<TickReport, RelayError> {
        let undelivered = self.store.fetch_undelivered().await?;
        let mut report = TickReport {
            fetched: undelivered.len(),
            ..TickReport::default()
        };

        for stored in undelivered {
            let payload = match stored.message.encode() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(message_id = %stored.id, error = %e, "Error encoding stored message");
                    report.pending += 1;
                    continue;
                }
            };

            let sender = stored.message.sender;
            let fan_out = self.router.deliver_to_others(Arc::from(payload), sender);
            if fan_out.delivered.is_empty() {
                report.pending += 1;
                continue;
            }

            match self.store.mark_delivered(stored.id).await {
                Ok(()) => {
                    debug!(
                        message_id = %stored.id,
                        recipients = fan_out.delivered.len(),
                        "Redelivered message"
                    );
                    report.delivered.push(stored.id);
                }
                Err(e) => {
                    warn!(message_id = %stored.id, error = %e, "Failed to update message status");
                    report.pending += 1;
                }
            }
        }

        Ok(report)
    }

    /// Tick every `period` until `shutdown` fires.
    ///
    /// The first tick runs one full period after start.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(period_ms = self.period.as_millis() as u64, "Redelivery scheduler started");
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.fetched > 0 => {
                            debug!(
                                fetched = report.fetched,
                                delivered = report.delivered.len(),
                                pending = report.pending,
                                "Redelivery tick"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Failed to retrieve undelivered messages"),
                    }
                }
            }
        }
        info!("Redelivery scheduler stopped");
    }
}

//! Relay tuning knobs.

use std::time::Duration;

/// Default redelivery period.
pub const DEFAULT_REDELIVERY_INTERVAL: Duration = Duration::from_secs(3);

/// Default per-connection outbound queue depth.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default publish queue depth.
pub const DEFAULT_PUBLISH_QUEUE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// How often the redelivery scheduler ticks
    pub redelivery_interval: Duration,
    /// Frames a connection may have queued before writes to it fail
    pub outbound_buffer: usize,
    /// Messages waiting for the publish worker before sessions wait
    pub publish_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            redelivery_interval: DEFAULT_REDELIVERY_INTERVAL,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            publish_queue: DEFAULT_PUBLISH_QUEUE,
        }
    }
}

//! Publish queue between sessions and the broadcast router.
//!
//! Sessions submit accepted messages through a [`Publisher`]; a single
//! [`PublishWorker`] task drains the queue and runs the fan-out. The session
//! awaits the [`FanOut`] so its acknowledgment goes out after the broadcast
//! attempt.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::router::{BroadcastRouter, FanOut};
use crate::types::ChatMessage;

struct PublishRequest {
    message: ChatMessage,
    reply: oneshot::Sender<Result<FanOut, RelayError>>,
}

/// Handle for submitting messages to the publish worker.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<PublishRequest>,
}

impl Publisher {
    /// Queue `message` for broadcast and wait for the fan-out result.
    pub async fn publish(&self, message: ChatMessage) -> Result<FanOut, RelayError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(PublishRequest { message, reply })
            .await
            .map_err(|_| RelayError::Shutdown)?;
        response.await.map_err(|_| RelayError::Shutdown)?
    }
}

/// Task that drains the publish queue.
pub struct PublishWorker {
    router: BroadcastRouter,
    rx: mpsc::Receiver<PublishRequest>,
}

impl PublishWorker {
    /// Run until cancelled or every [`Publisher`] is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Publish worker started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = self.rx.recv() => {
                    let Some(request) = request else { break };
                    let result = self.router.publish(&request.message);
                    if let Err(e) = &result {
                        warn!(error = %e, "Failed to publish message");
                    }
                    if request.reply.send(result).is_err() {
                        debug!("Publisher went away before the fan-out finished");
                    }
                }
            }
        }
        info!("Publish worker stopped");
    }
}

/// Create a bounded publish queue feeding `router`.
pub fn publish_queue(router: BroadcastRouter, capacity: usize) -> (Publisher, PublishWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Publisher { tx }, PublishWorker { router, rx })
}

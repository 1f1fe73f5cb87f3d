use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use crate::{Headers, MessageChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Encoding or the channel failed. The change stays committed at its source and
    /// consumers keep their stale copy until a later change supersedes it.
    Dropped,
}

/// Publishes change events after their source write committed. Never fails the caller.
#[derive(Clone)]
pub struct ChangePublisher {
    channel: Arc<dyn MessageChannel>,
}

impl ChangePublisher {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self { channel }
    }

    pub async fn publish_change<E: Serialize + Sync>(
        &self,
        channel: &str,
        event: &E,
        headers: Headers,
    ) -> PublishOutcome {
        let labels = [("channel".to_owned(), channel.to_owned())];

        let body = match serde_json::to_vec(event) {
            Ok(body) => body,
            Err(e) => {
                error!(channel, "failed to encode change event: {}", e);
                common_metrics::inc("channel_publish_failures_total", &labels, 1);
                return PublishOutcome::Dropped;
            }
        };

        let correlation_id = headers.correlation_id().unwrap_or_default().to_owned();
        match self.channel.publish(channel, body, headers).await {
            Ok(()) => {
                debug!(channel, correlation_id, "published change event");
                common_metrics::inc("channel_published_total", &labels, 1);
                PublishOutcome::Published
            }
            Err(e) => {
                error!(channel, correlation_id, "failed to publish change event: {}", e);
                common_metrics::inc("channel_publish_failures_total", &labels, 1);
                PublishOutcome::Dropped
            }
        }
    }
}

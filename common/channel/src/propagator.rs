//! # Propagator
//!
//! Consumes change events from one channel and applies them to a local store, acknowledging a
//! message only after its handler succeeded.
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use health::HealthHandle;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{ChannelError, Delivery, MessageChannel, Nack, RetryPolicy};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// The local store failed. Redelivering later may succeed.
    #[error("retryable: {0}")]
    Retryable(String),
    /// The message can never be applied, for example because it does not decode.
    #[error("poisoned: {0}")]
    Poisoned(String),
}

/// Applies one change event. Must be idempotent: the same message can arrive more than once.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn apply(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

#[derive(Clone, Debug)]
pub struct PropagatorConfig {
    pub poll_interval: time::Duration,
    /// Deliveries after which a retryable failure is dead-lettered.
    pub max_attempts: i32,
    pub retry_policy: RetryPolicy,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: time::Duration::from_millis(100),
            max_attempts: 10,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// How a delivery was settled with the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Acked,
    Requeued { delay: time::Duration },
    DeadLettered { reason: String },
}

impl Settlement {
    fn outcome(&self) -> &'static str {
        match self {
            Settlement::Acked => "ack",
            Settlement::Requeued { .. } => "requeue",
            Settlement::DeadLettered { .. } => "dead_letter",
        }
    }
}

pub struct Propagator {
    channel: Arc<dyn MessageChannel>,
    name: String,
    handler: Arc<dyn ChangeHandler>,
    config: PropagatorConfig,
    liveness: HealthHandle,
}

impl Propagator {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        name: &str,
        handler: Arc<dyn ChangeHandler>,
        config: PropagatorConfig,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            channel,
            name: name.to_owned(),
            handler,
            config,
            liveness,
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.name
    }

    /// Receive at most one message and settle it. `Ok(None)` means the channel had nothing due.
    pub async fn poll_once(&self) -> Result<Option<Settlement>, ChannelError> {
        let Some(delivery) = self.channel.receive(&self.name).await? else {
            return Ok(None);
        };

        let span = info_span!(
            "propagate",
            channel = %self.name,
            delivery_id = delivery.id,
            attempt = delivery.attempt,
            correlation_id = delivery.headers.correlation_id().unwrap_or_default(),
        );

        self.settle(delivery).instrument(span).await.map(Some)
    }

    async fn settle(&self, delivery: Delivery) -> Result<Settlement, ChannelError> {
        let labels = [("channel".to_owned(), self.name.clone())];
        let timing = common_metrics::timing_guard("propagator_handle_duration_ms", &labels);
        let result = self.handler.apply(&delivery).await;
        timing.fin();

        let settlement = match result {
            Ok(()) => {
                self.channel.ack(&delivery).await?;
                debug!("applied change");
                Settlement::Acked
            }
            Err(HandlerError::Poisoned(reason)) => {
                error!("dropping message that cannot be applied: {}", reason);
                self.dead_letter(&delivery, reason).await?
            }
            Err(HandlerError::Retryable(reason)) if delivery.attempt >= self.config.max_attempts => {
                error!("giving up after {} attempts: {}", delivery.attempt, reason);
                self.dead_letter(&delivery, reason).await?
            }
            Err(HandlerError::Retryable(reason)) => {
                let delay = self
                    .config
                    .retry_policy
                    .retry_interval(delivery.attempt.max(1).unsigned_abs());
                warn!(?delay, "failed to apply change, will retry: {}", reason);
                self.channel
                    .nack(&delivery, Nack::Requeue { delay })
                    .await?;
                Settlement::Requeued { delay }
            }
        };

        common_metrics::inc(
            "propagator_messages_total",
            &[
                ("channel".to_owned(), self.name.clone()),
                ("outcome".to_owned(), settlement.outcome().to_owned()),
            ],
            1,
        );
        Ok(settlement)
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: String,
    ) -> Result<Settlement, ChannelError> {
        self.channel
            .nack(
                delivery,
                Nack::DeadLetter {
                    reason: reason.clone(),
                },
            )
            .await?;
        Ok(Settlement::DeadLettered { reason })
    }

    /// Poll until `shutdown` fires. A handler already running is allowed to finish and settle
    /// its message before the loop exits.
    pub async fn run(self, shutdown: CancellationToken) {
        while let Err(e) = self.channel.declare(&self.name).await {
            error!(channel = %self.name, "failed to declare channel: {}", e);
            if self.wait_or_shutdown(&shutdown).await {
                return;
            }
        }
        info!(channel = %self.name, "propagator started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            self.liveness.report_healthy().await;

            match self.poll_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(channel = %self.name, "failed to poll channel: {}", e),
            }

            if self.wait_or_shutdown(&shutdown).await {
                break;
            }
        }
        info!(channel = %self.name, "propagator stopped");
    }

    /// Sleep one poll interval. Returns true when shutdown was requested meanwhile.
    async fn wait_or_shutdown(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{Headers, MemoryChannel};
    use health::HealthRegistry;

    /// Fails the first `failures` deliveries with the given error, then succeeds.
    struct ScriptedHandler {
        failures: usize,
        error: HandlerError,
        calls: AtomicUsize,
    }

    impl ScriptedHandler {
        fn new(failures: usize, error: HandlerError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                error,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChangeHandler for ScriptedHandler {
        async fn apply(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn config(max_attempts: i32) -> PropagatorConfig {
        PropagatorConfig {
            poll_interval: time::Duration::from_millis(5),
            max_attempts,
            retry_policy: RetryPolicy::build(1, time::Duration::ZERO).provide(),
        }
    }

    async fn propagator(
        channel: &MemoryChannel,
        handler: Arc<ScriptedHandler>,
        max_attempts: i32,
    ) -> Propagator {
        let registry = HealthRegistry::new("liveness");
        let liveness = registry
            .register("test-propagator", time::Duration::from_secs(30))
            .await;
        Propagator::new(
            Arc::new(channel.clone()),
            "product-updates",
            handler,
            config(max_attempts),
            liveness,
        )
    }

    async fn publish(channel: &MemoryChannel, body: &str) {
        channel
            .publish("product-updates", body.as_bytes().to_vec(), Headers::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn acks_after_successful_apply() {
        let channel = MemoryChannel::default();
        let handler = ScriptedHandler::new(0, HandlerError::Retryable(String::new()));
        let propagator = propagator(&channel, handler.clone(), 3).await;
        publish(&channel, "{}").await;

        assert_eq!(propagator.poll_once().await.unwrap(), Some(Settlement::Acked));
        assert_eq!(propagator.poll_once().await.unwrap(), None);
        assert_eq!(handler.calls(), 1);
        assert_eq!(channel.pending("product-updates").await, 0);
    }

    #[tokio::test]
    async fn retryable_failure_is_redelivered_until_applied() {
        let channel = MemoryChannel::default();
        let handler = ScriptedHandler::new(2, HandlerError::Retryable("db down".to_owned()));
        let propagator = propagator(&channel, handler.clone(), 5).await;
        publish(&channel, "{}").await;

        assert!(matches!(
            propagator.poll_once().await.unwrap(),
            Some(Settlement::Requeued { .. })
        ));
        assert!(matches!(
            propagator.poll_once().await.unwrap(),
            Some(Settlement::Requeued { .. })
        ));
        assert_eq!(propagator.poll_once().await.unwrap(), Some(Settlement::Acked));
        assert_eq!(handler.calls(), 3);
        assert!(channel.dead_letters("product-updates").await.is_empty());
    }

    #[tokio::test]
    async fn retryable_failure_is_dead_lettered_after_max_attempts() {
        let channel = MemoryChannel::default();
        let handler = ScriptedHandler::new(usize::MAX, HandlerError::Retryable("db down".to_owned()));
        let propagator = propagator(&channel, handler.clone(), 2).await;
        publish(&channel, "stuck").await;

        propagator.poll_once().await.unwrap();
        let last = propagator.poll_once().await.unwrap();

        assert_eq!(
            last,
            Some(Settlement::DeadLettered {
                reason: "db down".to_owned()
            })
        );
        assert_eq!(propagator.poll_once().await.unwrap(), None);
        assert_eq!(
            channel.dead_letters("product-updates").await,
            vec![b"stuck".to_vec()]
        );
    }

    #[tokio::test]
    async fn poisoned_message_is_dead_lettered_immediately() {
        let channel = MemoryChannel::default();
        let handler = ScriptedHandler::new(1, HandlerError::Poisoned("not json".to_owned()));
        let propagator = propagator(&channel, handler.clone(), 10).await;
        publish(&channel, "garbage").await;
        publish(&channel, "{}").await;

        assert!(matches!(
            propagator.poll_once().await.unwrap(),
            Some(Settlement::DeadLettered { .. })
        ));
        assert_eq!(propagator.poll_once().await.unwrap(), Some(Settlement::Acked));
        assert_eq!(handler.calls(), 2);
    }

    #[tokio::test]
    async fn run_drains_channel_and_stops_on_shutdown() {
        let channel = MemoryChannel::default();
        let handler = ScriptedHandler::new(0, HandlerError::Retryable(String::new()));
        let propagator = propagator(&channel, handler.clone(), 3).await;
        for _ in 0..3 {
            publish(&channel, "{}").await;
        }

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(propagator.run(shutdown.clone()));

        for _ in 0..200 {
            if handler.calls() == 3 {
                break;
            }
            tokio::time::sleep(time::Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        tokio::time::timeout(time::Duration::from_secs(1), task)
            .await
            .expect("propagator did not stop")
            .unwrap();

        assert_eq!(handler.calls(), 3);
        assert_eq!(channel.pending("product-updates").await, 0);
        assert!(channel.is_declared("product-updates").await);
    }

    /// Blocks inside `apply` until released.
    struct GatedHandler {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChangeHandler for GatedHandler {
        async fn apply(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_lets_running_handler_settle_its_message() {
        let channel = MemoryChannel::default();
        let handler = Arc::new(GatedHandler {
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let registry = HealthRegistry::new("liveness");
        let propagator = Propagator::new(
            Arc::new(channel.clone()),
            "product-updates",
            handler.clone(),
            config(3),
            registry
                .register("test-propagator", time::Duration::from_secs(30))
                .await,
        );
        publish(&channel, "{}").await;
        publish(&channel, "{}").await;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(propagator.run(shutdown.clone()));

        tokio::time::timeout(time::Duration::from_secs(1), handler.started.notified())
            .await
            .expect("handler never started");
        shutdown.cancel();
        assert!(!task.is_finished());
        assert_eq!(channel.in_flight("product-updates").await, 1);

        handler.release.notify_one();
        tokio::time::timeout(time::Duration::from_secs(1), task)
            .await
            .expect("propagator did not stop")
            .unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.in_flight("product-updates").await, 0);
        assert_eq!(channel.pending("product-updates").await, 1);
        assert!(channel.dead_letters("product-updates").await.is_empty());
    }
}

//! # Channels
//!
//! At-least-once, manually acknowledged point-to-point channels used to propagate change events
//! between services, plus the publisher and consumer loop built on top of them.
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod config;
mod headers;
mod memory;
mod pg;
mod propagator;
mod publisher;
mod retry;

pub use config::ChannelConfig;
pub use headers::{CorrelationId, Headers, CORRELATION_ID_HEADER, CORRELATION_ID_HTTP_HEADER};
pub use memory::{ChannelHandle, MemoryChannel};
pub use pg::PgChannel;
pub use propagator::{ChangeHandler, HandlerError, Propagator, PropagatorConfig, Settlement};
pub use publisher::{ChangePublisher, PublishOutcome};
pub use retry::{RetryPolicy, RetryPolicyBuilder};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("no channel handle became available within {0:?}")]
    PoolExhausted(Duration),
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("delivery {0} is not in flight")]
    NotInFlight(i64),
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// A message handed to a consumer. It stays in flight until acked or nacked.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: i64,
    pub channel: String,
    pub body: Vec<u8>,
    pub headers: Headers,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Nack {
    /// Make the message available again after `delay`.
    Requeue { delay: Duration },
    /// Move the message to the channel's dead-letter side channel.
    DeadLetter { reason: String },
}

/// Name of the side channel receiving messages that could not be processed on `channel`.
pub fn dead_letter_channel(channel: &str) -> String {
    format!("{channel}.dead-letter")
}

/// An at-least-once point-to-point queue with manual acknowledgement.
///
/// Every call acquires a handle from a bounded pool and releases it before returning, on
/// success and on error alike. Acquisition gives up with `ChannelError::PoolExhausted` instead
/// of blocking forever. Messages within one channel are delivered in publish order, except that
/// a requeued message goes behind messages published before its retry is due.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Idempotent.
    async fn declare(&self, channel: &str) -> Result<(), ChannelError>;

    /// Declares `channel` if needed, then enqueues the message.
    async fn publish(
        &self,
        channel: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<(), ChannelError>;

    /// Take the next available message, if any, marking it in flight.
    async fn receive(&self, channel: &str) -> Result<Option<Delivery>, ChannelError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    async fn nack(&self, delivery: &Delivery, nack: Nack) -> Result<(), ChannelError>;
}

//! In-process channel with the same delivery semantics as `PgChannel`. Test-only: it keeps
//! every published body for `published`, so its memory grows with traffic.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::{dead_letter_channel, ChannelError, Delivery, Headers, MessageChannel, Nack};

/// A handle checked out of a channel's bounded pool. Dropping it returns it.
pub struct ChannelHandle {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
struct Stored {
    id: i64,
    body: Vec<u8>,
    headers: Headers,
    attempt: i32,
    available_at: Instant,
}

#[derive(Default)]
struct State {
    next_id: i64,
    declared: HashSet<String>,
    queues: HashMap<String, VecDeque<Stored>>,
    in_flight: HashMap<i64, (String, Stored)>,
    published: HashMap<String, Vec<Vec<u8>>>,
}

#[derive(Clone)]
pub struct MemoryChannel {
    handles: Arc<Semaphore>,
    acquire_timeout: Duration,
    state: Arc<Mutex<State>>,
    publish_failure: Option<String>,
}

impl MemoryChannel {
    pub fn new(max_handles: usize, acquire_timeout: Duration) -> Self {
        Self {
            handles: Arc::new(Semaphore::new(max_handles)),
            acquire_timeout,
            state: Arc::new(Mutex::new(State::default())),
            publish_failure: None,
        }
    }

    /// Make every publish fail with `ChannelError::Unavailable`.
    pub fn fail_publish(mut self, reason: &str) -> Self {
        self.publish_failure = Some(reason.to_owned());
        self
    }

    pub async fn acquire_handle(&self) -> Result<ChannelHandle, ChannelError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.handles.clone().acquire_owned(),
        )
        .await
        .map_err(|_| ChannelError::PoolExhausted(self.acquire_timeout))?
        .map_err(|_| ChannelError::Unavailable("handle pool closed".to_owned()))?;

        Ok(ChannelHandle { _permit: permit })
    }

    pub fn available_handles(&self) -> usize {
        self.handles.available_permits()
    }

    pub async fn is_declared(&self, channel: &str) -> bool {
        self.state.lock().await.declared.contains(channel)
    }

    /// Bodies of every message ever published to `channel`, in publish order. Never pruned.
    pub async fn published(&self, channel: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        state.published.get(channel).cloned().unwrap_or_default()
    }

    /// Messages waiting on `channel`, due or not, excluding those in flight.
    pub async fn pending(&self, channel: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(channel).map_or(0, VecDeque::len)
    }

    /// Messages received from `channel` and not yet acked or nacked.
    pub async fn in_flight(&self, channel: &str) -> usize {
        let state = self.state.lock().await;
        state
            .in_flight
            .values()
            .filter(|(name, _)| name == channel)
            .count()
    }

    /// Bodies of the messages dead-lettered from `channel`.
    pub async fn dead_letters(&self, channel: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .queues
            .get(&dead_letter_channel(channel))
            .map(|queue| queue.iter().map(|stored| stored.body.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1))
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn declare(&self, channel: &str) -> Result<(), ChannelError> {
        let _handle = self.acquire_handle().await?;
        let mut state = self.state.lock().await;

        if state.declared.insert(channel.to_owned()) {
            state.queues.entry(channel.to_owned()).or_default();
        }
        Ok(())
    }

    async fn publish(
        &self,
        channel: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<(), ChannelError> {
        let _handle = self.acquire_handle().await?;

        if let Some(reason) = &self.publish_failure {
            return Err(ChannelError::Unavailable(reason.clone()));
        }

        let mut state = self.state.lock().await;
        state.declared.insert(channel.to_owned());
        state.next_id += 1;
        let stored = Stored {
            id: state.next_id,
            body: body.clone(),
            headers,
            attempt: 0,
            available_at: Instant::now(),
        };
        state
            .queues
            .entry(channel.to_owned())
            .or_default()
            .push_back(stored);
        state
            .published
            .entry(channel.to_owned())
            .or_default()
            .push(body);
        Ok(())
    }

    async fn receive(&self, channel: &str) -> Result<Option<Delivery>, ChannelError> {
        let _handle = self.acquire_handle().await?;
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let Some(queue) = state.queues.get_mut(channel) else {
            return Ok(None);
        };
        let Some(position) = queue.iter().position(|stored| stored.available_at <= now) else {
            return Ok(None);
        };
        let Some(mut stored) = queue.remove(position) else {
            return Ok(None);
        };

        stored.attempt += 1;
        let delivery = Delivery {
            id: stored.id,
            channel: channel.to_owned(),
            body: stored.body.clone(),
            headers: stored.headers.clone(),
            attempt: stored.attempt,
        };
        state.in_flight.insert(stored.id, (channel.to_owned(), stored));

        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let _handle = self.acquire_handle().await?;
        let mut state = self.state.lock().await;

        state
            .in_flight
            .remove(&delivery.id)
            .map(|_| ())
            .ok_or(ChannelError::NotInFlight(delivery.id))
    }

    async fn nack(&self, delivery: &Delivery, nack: Nack) -> Result<(), ChannelError> {
        let _handle = self.acquire_handle().await?;
        let mut state = self.state.lock().await;

        let (channel, mut stored) = state
            .in_flight
            .remove(&delivery.id)
            .ok_or(ChannelError::NotInFlight(delivery.id))?;

        let target = match nack {
            Nack::Requeue { delay } => {
                stored.available_at = Instant::now() + delay;
                channel
            }
            Nack::DeadLetter { .. } => {
                stored.available_at = Instant::now();
                stored.attempt = 0;
                let target = dead_letter_channel(&channel);
                state.declared.insert(target.clone());
                target
            }
        };
        state.queues.entry(target).or_default().push_back(stored);
        Ok(())
    }
}

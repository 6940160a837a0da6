//! Transport abstraction between the outbox and its consumers.
//!
//! `Publisher` and `Subscriber` are the seams a real broker binding would
//! implement. [`InMemoryQueue`] is the included implementation: an
//! append-only log with one read position per subscriber, good for
//! single-process wiring and tests. The transport promises at-least-once
//! delivery and nothing more — dedup is the inbox's job.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Wire envelope for a domain event.
#[derive(Clone, Debug)]
pub struct Event {
    /// Message identity, used by consumers for deduplication.
    pub id: String,
    pub event_type: String,
    /// Bitcode-encoded body.
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Event {
            id: id.into(),
            event_type: event_type.into(),
            payload,
        }
    }

    /// Create an event with a bitcode-serialized payload.
    pub fn encode<T: Serialize>(
        id: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, bitcode::Error> {
        Ok(Self::new(id, event_type, bitcode::serialize(payload)?))
    }

    /// Decode the payload back into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.payload)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("connection to broker failed: {0}")]
    ConnectionFailed(String),

    #[error("broker rejected event: {0}")]
    Rejected(String),

    #[error("transport state poisoned")]
    Poisoned,
}

/// Fan-out publishing side of the transport.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: Event) -> Result<(), PublishError>;
}

/// Consuming side of the transport.
///
/// `nack` asks the broker to redeliver; the inbox decides when a message
/// has been nacked enough times to dead-letter instead.
pub trait Subscriber: Send + Sync {
    /// Poll for the next event, blocking until one is available or timeout.
    fn poll(&self, timeout_ms: u64) -> Result<Option<Event>, PublishError>;

    /// Acknowledge that an event has been durably applied.
    fn ack(&self, event_id: &str) -> Result<(), PublishError>;

    /// Reject an event so the broker redelivers it.
    fn nack(&self, event_id: &str, reason: &str) -> Result<(), PublishError>;
}

#[derive(Default)]
struct SubscriberState {
    position: usize,
    /// Log index of the last event handed out by `poll`, so `nack`
    /// can rewind to it.
    last_delivered: Option<usize>,
    acked: Vec<String>,
}

/// In-memory queue for single-process wiring and tests.
///
/// All clones created with [`InMemoryQueue::new_subscriber`] share the same
/// log but keep independent read positions, so each downstream service sees
/// the full stream. The `down` flag simulates a broker outage: publishes
/// and polls fail with `ConnectionFailed` until the queue is brought back.
#[derive(Clone)]
pub struct InMemoryQueue {
    log: Arc<RwLock<Vec<Event>>>,
    down: Arc<Mutex<bool>>,
    state: Arc<Mutex<SubscriberState>>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        InMemoryQueue {
            log: Arc::new(RwLock::new(Vec::new())),
            down: Arc::new(Mutex::new(false)),
            state: Arc::new(Mutex::new(SubscriberState::default())),
        }
    }

    /// Create an independent subscriber over the same log.
    pub fn new_subscriber(&self) -> Self {
        InMemoryQueue {
            log: Arc::clone(&self.log),
            down: Arc::clone(&self.down),
            state: Arc::new(Mutex::new(SubscriberState::default())),
        }
    }

    /// Simulate the broker becoming unreachable (or reachable again).
    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    fn check_up(&self) -> Result<(), PublishError> {
        if *self.down.lock().map_err(|_| PublishError::Poisoned)? {
            Err(PublishError::ConnectionFailed("broker is down".into()))
        } else {
            Ok(())
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.read().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.log
            .read()
            .unwrap()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().unwrap().is_empty()
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.state.lock().unwrap().acked.clone()
    }
}

impl Publisher for InMemoryQueue {
    fn publish(&self, event: Event) -> Result<(), PublishError> {
        self.check_up()?;
        self.log
            .write()
            .map_err(|_| PublishError::Poisoned)?
            .push(event);
        Ok(())
    }
}

impl Subscriber for InMemoryQueue {
    fn poll(&self, timeout_ms: u64) -> Result<Option<Event>, PublishError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            self.check_up()?;
            {
                let log = self.log.read().map_err(|_| PublishError::Poisoned)?;
                let mut state = self.state.lock().map_err(|_| PublishError::Poisoned)?;

                if state.position < log.len() {
                    let index = state.position;
                    let event = log[index].clone();
                    state.position += 1;
                    state.last_delivered = Some(index);
                    return Ok(Some(event));
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&self, event_id: &str) -> Result<(), PublishError> {
        let mut state = self.state.lock().map_err(|_| PublishError::Poisoned)?;
        state.acked.push(event_id.to_string());
        state.last_delivered = None;
        Ok(())
    }

    fn nack(&self, event_id: &str, _reason: &str) -> Result<(), PublishError> {
        let log = self.log.read().map_err(|_| PublishError::Poisoned)?;
        let mut state = self.state.lock().map_err(|_| PublishError::Poisoned)?;

        // Rewind so the next poll redelivers the rejected event.
        if let Some(index) = state.last_delivered {
            if log.get(index).map(|e| e.id.as_str()) == Some(event_id) {
                state.position = index;
                state.last_delivered = None;
            }
        }
        Ok(())
    }
}

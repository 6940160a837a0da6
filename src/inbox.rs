//! Idempotent inbox consumption.
//!
//! The transport is at-least-once; the inbox makes redelivery harmless.
//! Each consumer keeps the set of message ids it has already applied: a
//! duplicate is acked without touching the handler, and a fresh message has
//! its effect applied and its id recorded in one critical section, so a
//! message is never half-processed. Messages that keep failing go to the
//! dead-letter sink instead of blocking the queue or vanishing.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::transport::{Event, Subscriber};

/// Handler failure classification. Transient failures are retried up to the
/// inbox's attempt cap; fatal ones dead-letter immediately.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("transient handler failure: {0}")]
    Transient(String),

    #[error("permanent handler failure: {0}")]
    Fatal(String),
}

/// Consumer-side effect application. Handlers must be idempotent with
/// respect to a single event: the inbox dedups by message id, but a crash
/// between applying and recording means one redelivery can reach the
/// handler again.
pub trait EventHandler: Send {
    fn handle(&mut self, event: &Event) -> Result<(), HandleError>;
}

/// What the worker should tell the transport about a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

/// A message the inbox gave up on, kept for manual inspection.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub event: Event,
    pub reason: String,
}

/// Shared append-only sink for poison messages.
#[derive(Clone, Default)]
pub struct DeadLetterSink {
    entries: Arc<Mutex<Vec<DeadLetter>>>,
}

impl DeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event, reason: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(DeadLetter { event, reason });
        }
    }

    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-consumer inbox: dedup state, retry accounting, and the handler.
pub struct Inbox<H> {
    name: String,
    handler: H,
    processed: HashSet<String>,
    attempts: HashMap<String, u32>,
    max_attempts: u32,
    dead_letters: DeadLetterSink,
}

impl<H> Inbox<H> {
    pub fn new(name: impl Into<String>, handler: H) -> Self {
        Inbox {
            name: name.into(),
            handler,
            processed: HashSet::new(),
            attempts: HashMap::new(),
            max_attempts: 5,
            dead_letters: DeadLetterSink::new(),
        }
    }

    /// Cap delivery attempts per message before dead-lettering.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Route poison messages to a shared sink.
    pub fn with_dead_letter_sink(mut self, sink: DeadLetterSink) -> Self {
        self.dead_letters = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn dead_letters(&self) -> &DeadLetterSink {
        &self.dead_letters
    }

    pub fn is_processed(&self, event_id: &str) -> bool {
        self.processed.contains(event_id)
    }
}

impl<H: EventHandler> Inbox<H> {
    /// Apply one delivery.
    ///
    /// Already-seen ids ack immediately with no side effects. Otherwise the
    /// handler's effect and the processed-id insertion happen together;
    /// transient failures nack for redelivery until the attempt cap, after
    /// which the message is dead-lettered and consumed.
    pub fn process(&mut self, event: &Event) -> Disposition {
        if self.processed.contains(&event.id) {
            debug!(consumer = %self.name, event_id = %event.id, "duplicate delivery, acking");
            return Disposition::Ack;
        }

        match self.handler.handle(event) {
            Ok(()) => {
                self.processed.insert(event.id.clone());
                self.attempts.remove(&event.id);
                Disposition::Ack
            }
            Err(HandleError::Transient(reason)) => {
                let attempts = self.attempts.entry(event.id.clone()).or_insert(0);
                *attempts += 1;
                if *attempts >= self.max_attempts {
                    warn!(
                        consumer = %self.name,
                        event_id = %event.id,
                        attempts = *attempts,
                        "attempts exhausted, dead-lettering"
                    );
                    self.quarantine(event, reason);
                    Disposition::Ack
                } else {
                    Disposition::Nack
                }
            }
            Err(HandleError::Fatal(reason)) => {
                warn!(consumer = %self.name, event_id = %event.id, "fatal handler failure, dead-lettering");
                self.quarantine(event, reason);
                Disposition::Ack
            }
        }
    }

    /// Dead-letter and consume so redeliveries stop reaching the handler.
    fn quarantine(&mut self, event: &Event, reason: String) {
        self.dead_letters.push(event.clone(), reason);
        self.processed.insert(event.id.clone());
        self.attempts.remove(&event.id);
    }
}

/// Totals from a stopped [`InboxWorker`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: usize,
    pub nacked: usize,
}

/// Background thread that polls a [`Subscriber`] and drives an [`Inbox`].
///
/// A nacked message is left to the transport for redelivery after a fixed
/// delay. The stop signal is honored between messages, so an in-flight
/// delivery always completes or is returned un-acked — never half applied.
pub struct InboxWorker {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ConsumerStats>>,
}

impl InboxWorker {
    pub fn spawn<H, S>(mut inbox: Inbox<H>, subscriber: S, redelivery_delay: Duration) -> Self
    where
        H: EventHandler + 'static,
        S: Subscriber + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = ConsumerStats::default();
            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                match subscriber.poll(50) {
                    Ok(Some(event)) => match inbox.process(&event) {
                        Disposition::Ack => {
                            let _ = subscriber.ack(&event.id);
                            stats.acked += 1;
                        }
                        Disposition::Nack => {
                            let _ = subscriber.nack(&event.id, "transient handler failure");
                            stats.nacked += 1;
                            thread::sleep(redelivery_delay);
                        }
                    },
                    Ok(None) => {}
                    Err(err) => {
                        warn!(error = %err, "transport poll failed");
                        thread::sleep(redelivery_delay);
                    }
                }
            }
            stats
        });

        InboxWorker {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and wait for the in-flight message.
    pub fn stop(mut self) -> ConsumerStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            ConsumerStats::default()
        }
    }
}

impl Drop for InboxWorker {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

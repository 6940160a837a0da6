//! Transactional outbox dispatch.
//!
//! Rows are written by the store inside the same commit as the state change
//! that produced them; this module only moves committed rows to the
//! transport. A row is marked published strictly after the transport
//! acknowledges it — a failed publish leaves it pending and the next drain
//! cycle retries, which is where the at-least-once guarantee comes from.

use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::AuctionStore;
use crate::transport::{Event, Publisher};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    #[default]
    Pending,
    Published,
}

/// A durable outbox row: one committed domain event awaiting dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Global insertion order. Draining in `seq` order preserves each
    /// auction's event order end to end.
    pub seq: u64,
    pub id: String,
    pub auction_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub created_at: SystemTime,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub published_at: Option<SystemTime>,
}

impl OutboxMessage {
    pub fn new(
        seq: u64,
        auction_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Vec<u8>,
        created_at: SystemTime,
    ) -> Self {
        let auction_id = auction_id.into();
        let event_type = event_type.into();
        OutboxMessage {
            id: format!("{}:{}:{}", auction_id, event_type, seq),
            seq,
            auction_id,
            event_type,
            payload,
            created_at,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            published_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }
}

/// Result of one drain cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainResult {
    pub published: usize,
    pub failed: usize,
}

/// Drains pending outbox rows to a [`Publisher`], oldest first.
pub struct OutboxDrain<P> {
    store: AuctionStore,
    publisher: P,
    batch_size: usize,
}

impl<P> OutboxDrain<P> {
    pub fn new(store: AuctionStore, publisher: P) -> Self {
        OutboxDrain {
            store,
            publisher,
            batch_size: 100,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

impl<P: Publisher> OutboxDrain<P> {
    /// Publish up to one batch of pending rows.
    ///
    /// Stops at the first failure: continuing past an undelivered row would
    /// reorder that auction's event stream on retry.
    pub fn drain_once(&self) -> DrainResult {
        let mut result = DrainResult::default();

        let pending = match self.store.pending_outbox(self.batch_size) {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "outbox scan failed");
                return result;
            }
        };

        for row in pending {
            let event = Event::new(&row.id, &row.event_type, row.payload.clone());
            match self.publisher.publish(event) {
                Ok(()) => {
                    if self.store.mark_published(row.seq).is_ok() {
                        result.published += 1;
                    }
                }
                Err(err) => {
                    warn!(seq = row.seq, error = %err, "publish failed, row stays pending");
                    let _ = self.store.record_publish_failure(row.seq, &err.to_string());
                    result.failed += 1;
                    break;
                }
            }
        }

        if result.published > 0 {
            debug!(published = result.published, "outbox drained");
        }
        result
    }
}

/// Totals from a stopped [`OutboxWorker`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: usize,
    pub published: usize,
    pub failed: usize,
}

/// Background thread running [`OutboxDrain`] on a fixed interval.
///
/// The drain runs off the request path; bid requests never block on the
/// transport. Stopping waits for the in-flight cycle to finish.
pub struct OutboxWorker {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl OutboxWorker {
    pub fn spawn<P>(store: AuctionStore, publisher: P, drain_interval: Duration) -> Self
    where
        P: Publisher + 'static,
    {
        let (stop_tx, stop_rx) = channel();
        let drain = OutboxDrain::new(store, publisher);

        let handle = thread::spawn(move || {
            let mut stats = WorkerStats::default();
            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                stats.polls += 1;
                let result = drain.drain_once();
                stats.published += result.published;
                stats.failed += result.failed;

                thread::sleep(drain_interval);
            }
            stats
        });

        OutboxWorker {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and wait for the current cycle to finish.
    pub fn stop(mut self) -> WorkerStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            WorkerStats::default()
        }
    }
}

impl Drop for OutboxWorker {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

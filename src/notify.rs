//! Notification fanout.
//!
//! Bridges the durable event pipeline to in-process UI listeners. Each
//! domain event is re-emitted on a channel named after its wire type, so a
//! listener can subscribe to just "BidPlaced" or just "AuctionFinished".
//! Delivery to listeners is fire-and-forget: a slow listener never holds up
//! the inbox.

use std::sync::{Arc, Mutex};

use event_emitter_rs::EventEmitter;
use serde::Deserialize;
use tracing::debug;

use crate::events::DomainEvent;
use crate::inbox::{EventHandler, HandleError};
use crate::transport::Event;

/// Inbox handler that republishes domain events to an [`EventEmitter`].
///
/// The emitter is shared behind a mutex so the UI side can keep registering
/// listeners while the consumer thread is delivering.
#[derive(Clone, Default)]
pub struct NotificationFanout {
    emitter: Arc<Mutex<EventEmitter>>,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event type. The payload arrives as the
    /// typed event struct for that channel.
    pub fn on<F, T>(&self, event_type: &str, listener: F)
    where
        for<'de> T: Deserialize<'de>,
        F: Fn(T) + Send + Sync + 'static,
    {
        if let Ok(mut emitter) = self.emitter.lock() {
            emitter.on(event_type, listener);
        }
    }

    pub fn emitter(&self) -> Arc<Mutex<EventEmitter>> {
        Arc::clone(&self.emitter)
    }
}

impl EventHandler for NotificationFanout {
    fn handle(&mut self, event: &Event) -> Result<(), HandleError> {
        let domain =
            DomainEvent::decode(&event.payload).map_err(|e| HandleError::Fatal(e.to_string()))?;

        let mut emitter = self
            .emitter
            .lock()
            .map_err(|_| HandleError::Transient("emitter lock poisoned".into()))?;

        debug!(event_type = domain.event_type(), auction_id = %domain.auction_id(), "fanning out");
        match domain {
            DomainEvent::AuctionCreated(e) => emitter.emit("AuctionCreated", e),
            DomainEvent::AuctionUpdated(e) => emitter.emit("AuctionUpdated", e),
            DomainEvent::AuctionDeleted(e) => emitter.emit("AuctionDeleted", e),
            DomainEvent::AuctionFinished(e) => emitter.emit("AuctionFinished", e),
            DomainEvent::BidPlaced(e) => emitter.emit("BidPlaced", e),
        };
        Ok(())
    }
}

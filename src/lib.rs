mod auction;
mod bidding;
mod clock;
mod config;
mod error;
mod events;
mod inbox;
mod lifecycle;
mod notify;
mod outbox;
mod search;
mod store;
mod transport;

pub use auction::{Auction, AuctionStatus, Bid, BidOutcome, Item};
pub use bidding::evaluate;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoordinatorConfig;
pub use error::CoordinatorError;
pub use events::{
    AuctionCreated, AuctionDeleted, AuctionFinished, AuctionUpdated, BidPlaced, DomainEvent,
};
pub use inbox::{
    ConsumerStats, DeadLetter, DeadLetterSink, Disposition, EventHandler, HandleError, Inbox,
    InboxWorker,
};
pub use lifecycle::{close_due_auctions, LifecycleWorker};
pub use notify::NotificationFanout;
pub use outbox::{
    DrainResult, OutboxDrain, OutboxMessage, OutboxStatus, OutboxWorker, WorkerStats,
};
pub use search::{catch_up, AuctionQuery, SearchItem, SearchProjector, SearchStore};
pub use store::{AuctionStore, ItemChanges, Txn};
pub use transport::{Event, InMemoryQueue, PublishError, Publisher, Subscriber};

// Re-export the EventEmitter from the event_emitter_rs crate
pub use event_emitter_rs::EventEmitter;

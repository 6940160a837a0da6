//! Search read model.
//!
//! A denormalized, query-optimized copy of auction state, kept in sync two
//! ways — both are required: the [`SearchProjector`] folds events arriving
//! through an inbox, and [`catch_up`] pulls everything newer than the local
//! watermark from the record of truth, so a consumer that was offline while
//! events flew by still converges on cold start.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auction::{Auction, AuctionStatus};
use crate::error::CoordinatorError;
use crate::events::DomainEvent;
use crate::inbox::{EventHandler, HandleError};
use crate::store::AuctionStore;
use crate::transport::Event;

/// Flattened auction + item record served by the search side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub id: String,
    pub seller: String,
    pub winner: Option<String>,
    pub sold_amount: Option<u64>,
    pub current_high_bid: Option<u64>,
    pub reserve_price: u64,
    pub status: AuctionStatus,
    pub auction_end: SystemTime,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub make: String,
    pub model: String,
    pub year: u32,
    pub color: String,
    pub mileage: u32,
    pub image_url: String,
}

impl SearchItem {
    pub fn from_auction(auction: &Auction) -> Self {
        SearchItem {
            id: auction.id.clone(),
            seller: auction.seller.clone(),
            winner: auction.winner.clone(),
            sold_amount: auction.sold_amount,
            current_high_bid: auction.current_high_bid,
            reserve_price: auction.reserve_price,
            status: auction.status,
            auction_end: auction.auction_end,
            created_at: auction.created_at,
            updated_at: auction.updated_at,
            make: auction.item.make.clone(),
            model: auction.item.model.clone(),
            year: auction.item.year,
            color: auction.item.color.clone(),
            mileage: auction.item.mileage,
            image_url: auction.item.image_url.clone(),
        }
    }
}

/// Shared search-side collection. Eventually consistent with the auction
/// store; never partially updated, since every write replaces a whole item.
#[derive(Clone, Default)]
pub struct SearchStore {
    items: Arc<RwLock<HashMap<String, SearchItem>>>,
}

impl SearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, item: SearchItem) {
        if let Ok(mut items) = self.items.write() {
            items.insert(item.id.clone(), item);
        }
    }

    pub fn get(&self, id: &str) -> Option<SearchItem> {
        self.items.read().ok()?.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.items
            .write()
            .map(|mut items| items.remove(id).is_some())
            .unwrap_or(false)
    }

    pub fn all(&self) -> Vec<SearchItem> {
        self.items
            .read()
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// High-water mark for the pull-based catch-up: the newest `updated_at`
    /// this store has seen, or `None` on a cold start.
    pub fn watermark(&self) -> Option<SystemTime> {
        self.items
            .read()
            .ok()?
            .values()
            .map(|item| item.updated_at)
            .max()
    }

    /// Case-insensitive substring match over make, model, and color.
    pub fn search(&self, term: &str) -> Vec<SearchItem> {
        let term = term.to_lowercase();
        self.items
            .read()
            .map(|items| {
                items
                    .values()
                    .filter(|item| {
                        item.make.to_lowercase().contains(&term)
                            || item.model.to_lowercase().contains(&term)
                            || item.color.to_lowercase().contains(&term)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Folds domain events into the search store.
///
/// Every arm is an upsert or whole-item replacement, so reapplying an event
/// leaves the store exactly where one application left it.
pub struct SearchProjector {
    store: SearchStore,
}

impl SearchProjector {
    pub fn new(store: SearchStore) -> Self {
        SearchProjector { store }
    }

    pub fn store(&self) -> &SearchStore {
        &self.store
    }
}

impl EventHandler for SearchProjector {
    fn handle(&mut self, event: &Event) -> Result<(), HandleError> {
        let domain =
            DomainEvent::decode(&event.payload).map_err(|e| HandleError::Fatal(e.to_string()))?;

        match domain {
            DomainEvent::AuctionCreated(e) => {
                self.store.upsert(SearchItem {
                    id: e.auction_id,
                    seller: e.seller,
                    winner: None,
                    sold_amount: None,
                    current_high_bid: None,
                    reserve_price: e.reserve_price,
                    status: AuctionStatus::Live,
                    auction_end: e.auction_end,
                    created_at: e.created_at,
                    updated_at: e.created_at,
                    make: e.make,
                    model: e.model,
                    year: e.year,
                    color: e.color,
                    mileage: e.mileage,
                    image_url: e.image_url,
                });
            }
            DomainEvent::AuctionUpdated(e) => {
                let mut item = self.store.get(&e.auction_id).ok_or_else(|| {
                    HandleError::Transient(format!("auction {} not yet projected", e.auction_id))
                })?;
                if let Some(make) = e.make {
                    item.make = make;
                }
                if let Some(model) = e.model {
                    item.model = model;
                }
                if let Some(year) = e.year {
                    item.year = year;
                }
                if let Some(color) = e.color {
                    item.color = color;
                }
                if let Some(mileage) = e.mileage {
                    item.mileage = mileage;
                }
                item.updated_at = e.updated_at;
                self.store.upsert(item);
            }
            DomainEvent::AuctionDeleted(e) => {
                self.store.remove(&e.auction_id);
            }
            DomainEvent::AuctionFinished(e) => {
                let mut item = self.store.get(&e.auction_id).ok_or_else(|| {
                    HandleError::Transient(format!("auction {} not yet projected", e.auction_id))
                })?;
                item.status = AuctionStatus::Finished;
                item.winner = e.winner;
                item.sold_amount = e.amount;
                item.updated_at = e.finished_at;
                self.store.upsert(item);
            }
            DomainEvent::BidPlaced(e) => {
                let mut item = self.store.get(&e.auction_id).ok_or_else(|| {
                    HandleError::Transient(format!("auction {} not yet projected", e.auction_id))
                })?;
                // Only accepted bids move the displayed high bid.
                if e.outcome.is_accepted() && e.amount > item.current_high_bid.unwrap_or(0) {
                    item.current_high_bid = Some(e.amount);
                    item.updated_at = e.placed_at;
                    self.store.upsert(item);
                }
            }
        }
        Ok(())
    }
}

/// Pull surface the catch-up sync reads from. The auction store implements
/// it directly; over the network this would be the auction service's query
/// endpoint.
pub trait AuctionQuery {
    fn auctions_updated_after(
        &self,
        watermark: Option<SystemTime>,
    ) -> Result<Vec<Auction>, CoordinatorError>;
}

impl AuctionQuery for AuctionStore {
    fn auctions_updated_after(
        &self,
        watermark: Option<SystemTime>,
    ) -> Result<Vec<Auction>, CoordinatorError> {
        AuctionStore::auctions_updated_after(self, watermark)
    }
}

/// Reconcile the search store with everything newer than its watermark.
///
/// Retries forever with a fixed backoff while the source is unreachable:
/// projector startup must not fail hard just because the upstream service
/// is still booting. Returns the number of records pulled.
pub fn catch_up<Q: AuctionQuery>(store: &SearchStore, source: &Q, backoff: Duration) -> usize {
    let watermark = store.watermark();
    loop {
        match source.auctions_updated_after(watermark) {
            Ok(auctions) => {
                for auction in &auctions {
                    store.upsert(SearchItem::from_auction(auction));
                }
                info!(pulled = auctions.len(), "catch-up sync complete");
                return auctions.len();
            }
            Err(err) => {
                warn!(error = %err, "catch-up source unreachable, backing off");
                thread::sleep(backoff);
            }
        }
    }
}

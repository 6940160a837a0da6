//! Auction aggregate store.
//!
//! Owns the canonical auctions, their bid logs, and the outbox table in one
//! persistence boundary. All mutation goes through [`AuctionStore::with_auction`],
//! which serializes writers per auction id and commits the state change and
//! any emitted events atomically — both land or neither does.
//!
//! The store is shared by cloning; clones are handles to the same storage.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use tracing::debug;
use uuid::Uuid;

use crate::auction::{Auction, Bid, BidOutcome, Item};
use crate::bidding;
use crate::clock::{Clock, SystemClock};
use crate::error::CoordinatorError;
use crate::events::{AuctionDeleted, AuctionUpdated, DomainEvent};
use crate::outbox::{OutboxMessage, OutboxStatus};

/// Per-auction writer lock with a bounded wait.
struct AuctionLock {
    held: Mutex<bool>,
    wake: Condvar,
}

impl AuctionLock {
    fn new() -> Self {
        AuctionLock {
            held: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    /// Acquire within `timeout`. Returns false when the wait expires, so
    /// callers can surface `Conflict` instead of blocking indefinitely.
    fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        while *held {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => return false,
            };
            match self.wake.wait_timeout(held, remaining) {
                Ok((guard, result)) => {
                    held = guard;
                    if result.timed_out() && *held {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        *held = true;
        true
    }

    fn release(&self) {
        if let Ok(mut held) = self.held.lock() {
            *held = false;
            self.wake.notify_one();
        }
    }
}

/// Events and bid facts captured inside a [`AuctionStore::with_auction`]
/// closure, committed together with the mutated auction.
#[derive(Default)]
pub struct Txn {
    events: Vec<DomainEvent>,
    bids: Vec<Bid>,
}

impl Txn {
    /// Record an event to be appended to the outbox in the same commit as
    /// the state change.
    pub fn emit(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    fn record_bid(&mut self, bid: Bid) {
        self.bids.push(bid);
    }
}

/// Item fields a seller may change on a live auction. `None` leaves the
/// field as is.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemChanges {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<u32>,
    pub color: Option<String>,
    pub mileage: Option<u32>,
}

struct StoreInner {
    auctions: HashMap<String, Auction>,
    bids: HashMap<String, Vec<Bid>>,
    outbox: Vec<OutboxMessage>,
    next_seq: u64,
}

impl StoreInner {
    fn new() -> Self {
        StoreInner {
            auctions: HashMap::new(),
            bids: HashMap::new(),
            outbox: Vec::new(),
            next_seq: 1,
        }
    }

    fn append_outbox(&mut self, event: &DomainEvent, now: SystemTime) -> Result<(), CoordinatorError> {
        let payload = event.encode()?;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outbox.push(OutboxMessage::new(
            seq,
            event.auction_id(),
            event.event_type(),
            payload,
            now,
        ));
        Ok(())
    }
}

/// The canonical auction record of truth.
#[derive(Clone)]
pub struct AuctionStore {
    inner: Arc<Mutex<StoreInner>>,
    locks: Arc<Mutex<HashMap<String, Arc<AuctionLock>>>>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl Default for AuctionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuctionStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        AuctionStore {
            inner: Arc::new(Mutex::new(StoreInner::new())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
            lock_timeout: Duration::from_secs(5),
        }
    }

    /// Bound the per-auction lock wait; expiry surfaces as `Conflict`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn now(&self) -> SystemTime {
        self.clock.now()
    }

    fn inner(&self) -> Result<MutexGuard<'_, StoreInner>, CoordinatorError> {
        self.inner
            .lock()
            .map_err(|_| CoordinatorError::LockPoisoned("auction store"))
    }

    fn auction_lock(&self, id: &str) -> Result<Arc<AuctionLock>, CoordinatorError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| CoordinatorError::LockPoisoned("lock map"))?;
        Ok(locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AuctionLock::new()))
            .clone())
    }

    /// Run `f` with exclusive access to an up-to-date auction snapshot.
    ///
    /// Events emitted through the [`Txn`] become outbox rows in the same
    /// commit as the mutated state. When `f` returns an error, neither the
    /// mutation nor the events are persisted.
    ///
    /// Fails with `NotFound` for unknown ids and `Conflict` when a
    /// concurrent writer holds the auction past the bounded wait.
    pub fn with_auction<T, F>(&self, id: &str, f: F) -> Result<T, CoordinatorError>
    where
        F: FnOnce(&mut Auction, &mut Txn) -> Result<T, CoordinatorError>,
    {
        if !self.inner()?.auctions.contains_key(id) {
            return Err(CoordinatorError::NotFound(id.to_string()));
        }

        let lock = self.auction_lock(id)?;
        if !lock.acquire(self.lock_timeout) {
            debug!(auction_id = id, "lock wait expired");
            return Err(CoordinatorError::Conflict(id.to_string()));
        }

        let result = self.commit_txn(id, f);
        lock.release();
        result
    }

    fn commit_txn<T, F>(&self, id: &str, f: F) -> Result<T, CoordinatorError>
    where
        F: FnOnce(&mut Auction, &mut Txn) -> Result<T, CoordinatorError>,
    {
        let mut auction = self
            .inner()?
            .auctions
            .get(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))?;

        let mut txn = Txn::default();
        let value = f(&mut auction, &mut txn)?;

        let now = self.now();
        let mut inner = self.inner()?;
        for event in &txn.events {
            inner.append_outbox(event, now)?;
        }
        if !txn.bids.is_empty() {
            inner.bids.entry(id.to_string()).or_default().extend(txn.bids);
        }
        inner.auctions.insert(id.to_string(), auction);
        Ok(value)
    }

    /// Create a new auction and append `AuctionCreated` atomically.
    pub fn create_auction(
        &self,
        seller: &str,
        reserve_price: u64,
        auction_end: SystemTime,
        item: Item,
    ) -> Result<Auction, CoordinatorError> {
        let now = self.now();
        let auction = Auction::new(
            Uuid::new_v4().to_string(),
            seller,
            reserve_price,
            auction_end,
            item,
            now,
        );
        let event = DomainEvent::created(&auction);

        let mut inner = self.inner()?;
        inner.append_outbox(&event, now)?;
        inner.auctions.insert(auction.id.clone(), auction.clone());
        Ok(auction)
    }

    /// Seller-only item update; appends `AuctionUpdated`.
    pub fn update_auction(
        &self,
        id: &str,
        actor: &str,
        changes: ItemChanges,
    ) -> Result<Auction, CoordinatorError> {
        let now = self.now();
        let actor = actor.to_string();
        self.with_auction(id, move |auction, txn| {
            if auction.seller != actor {
                return Err(CoordinatorError::NotSeller(actor.clone()));
            }

            if let Some(make) = &changes.make {
                auction.item.make = make.clone();
            }
            if let Some(model) = &changes.model {
                auction.item.model = model.clone();
            }
            if let Some(year) = changes.year {
                auction.item.year = year;
            }
            if let Some(color) = &changes.color {
                auction.item.color = color.clone();
            }
            if let Some(mileage) = changes.mileage {
                auction.item.mileage = mileage;
            }
            auction.updated_at = now;

            txn.emit(DomainEvent::AuctionUpdated(AuctionUpdated {
                auction_id: auction.id.clone(),
                make: changes.make.clone(),
                model: changes.model.clone(),
                year: changes.year,
                color: changes.color.clone(),
                mileage: changes.mileage,
                updated_at: now,
            }));
            Ok(auction.clone())
        })
    }

    /// Seller-only removal; appends `AuctionDeleted` atomically with it.
    pub fn delete_auction(&self, id: &str, actor: &str) -> Result<(), CoordinatorError> {
        if !self.inner()?.auctions.contains_key(id) {
            return Err(CoordinatorError::NotFound(id.to_string()));
        }
        let lock = self.auction_lock(id)?;
        if !lock.acquire(self.lock_timeout) {
            return Err(CoordinatorError::Conflict(id.to_string()));
        }

        let result = (|| {
            let now = self.now();
            let mut inner = self.inner()?;
            let auction = inner
                .auctions
                .get(id)
                .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))?;
            if auction.seller != actor {
                return Err(CoordinatorError::NotSeller(actor.to_string()));
            }

            let event = DomainEvent::AuctionDeleted(AuctionDeleted {
                auction_id: id.to_string(),
                deleted_at: now,
            });
            inner.append_outbox(&event, now)?;
            inner.auctions.remove(id);
            inner.bids.remove(id);
            Ok(())
        })();

        lock.release();
        result
    }

    /// Validate, evaluate, and record a bid; the fact, the denormalized
    /// high-bid update, and the `BidPlaced` event commit together.
    ///
    /// Every outcome is recorded for audit — rejected and late bids too.
    pub fn place_bid(
        &self,
        auction_id: &str,
        bidder: &str,
        amount: u64,
    ) -> Result<Bid, CoordinatorError> {
        let now = self.now();
        let bidder = bidder.to_string();
        self.with_auction(auction_id, move |auction, txn| {
            if auction.seller == bidder {
                return Err(CoordinatorError::InvalidBidder(bidder.clone()));
            }

            let outcome = bidding::evaluate(auction, auction.current_high_bid, amount, now);
            let bid = Bid {
                id: Uuid::new_v4().to_string(),
                auction_id: auction.id.clone(),
                bidder: bidder.clone(),
                amount,
                outcome,
                placed_at: now,
            };

            match outcome {
                BidOutcome::Accepted => {
                    auction.current_high_bid = Some(amount);
                    auction.winner = Some(bidder.clone());
                    auction.updated_at = now;
                }
                BidOutcome::AcceptedBelowReserve => {
                    auction.current_high_bid = Some(amount);
                    auction.updated_at = now;
                }
                BidOutcome::TooLow | BidOutcome::Finished => {}
            }

            txn.record_bid(bid.clone());
            txn.emit(DomainEvent::bid_placed(&bid));
            Ok(bid)
        })
    }

    pub fn load_auction(&self, id: &str) -> Result<Auction, CoordinatorError> {
        self.inner()?
            .auctions
            .get(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))
    }

    pub fn bids_for(&self, id: &str) -> Result<Vec<Bid>, CoordinatorError> {
        Ok(self.inner()?.bids.get(id).cloned().unwrap_or_default())
    }

    pub fn high_bid(&self, id: &str) -> Result<Option<u64>, CoordinatorError> {
        Ok(self.load_auction(id)?.current_high_bid)
    }

    /// Pull surface for the read-model catch-up sync: auctions with
    /// `updated_at` strictly after the watermark (all of them when `None`).
    pub fn auctions_updated_after(
        &self,
        watermark: Option<SystemTime>,
    ) -> Result<Vec<Auction>, CoordinatorError> {
        let inner = self.inner()?;
        Ok(inner
            .auctions
            .values()
            .filter(|a| match watermark {
                Some(mark) => a.updated_at > mark,
                None => true,
            })
            .cloned()
            .collect())
    }

    /// Ids of live auctions whose end time has passed.
    pub fn due_auctions(&self, now: SystemTime) -> Result<Vec<String>, CoordinatorError> {
        let inner = self.inner()?;
        Ok(inner
            .auctions
            .values()
            .filter(|a| a.is_live() && a.auction_end <= now)
            .map(|a| a.id.clone())
            .collect())
    }

    // Outbox surface, consumed by the drain.

    /// Undispatched rows, oldest first. Insertion order per auction is
    /// publish order.
    pub fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>, CoordinatorError> {
        let inner = self.inner()?;
        Ok(inner
            .outbox
            .iter()
            .filter(|m| m.status == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    /// Mark a row dispatched after the transport acknowledged it.
    pub fn mark_published(&self, seq: u64) -> Result<(), CoordinatorError> {
        let now = self.now();
        let mut inner = self.inner()?;
        if let Some(row) = inner.outbox.iter_mut().find(|m| m.seq == seq) {
            row.status = OutboxStatus::Published;
            row.attempts += 1;
            row.published_at = Some(now);
        }
        Ok(())
    }

    /// Leave a row pending for the next drain cycle after a failed publish.
    pub fn record_publish_failure(&self, seq: u64, error: &str) -> Result<(), CoordinatorError> {
        let mut inner = self.inner()?;
        if let Some(row) = inner.outbox.iter_mut().find(|m| m.seq == seq) {
            row.attempts += 1;
            row.last_error = Some(error.to_string());
        }
        Ok(())
    }

    /// Snapshot of the whole outbox table.
    pub fn outbox(&self) -> Result<Vec<OutboxMessage>, CoordinatorError> {
        Ok(self.inner()?.outbox.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::AuctionStatus;
    use crate::clock::ManualClock;
    use std::thread;

    fn manual_store() -> (AuctionStore, ManualClock) {
        let clock = ManualClock::at(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
        let store = AuctionStore::with_clock(clock.clone());
        (store, clock)
    }

    fn hour_from(clock: &ManualClock) -> SystemTime {
        clock.now() + Duration::from_secs(3_600)
    }

    #[test]
    fn create_commits_state_and_outbox_together() {
        let (store, clock) = manual_store();
        let auction = store
            .create_auction("alice", 1_000, hour_from(&clock), Item::default())
            .unwrap();

        assert!(store.load_auction(&auction.id).is_ok());
        let outbox = store.outbox().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].event_type, "AuctionCreated");
        assert_eq!(outbox[0].auction_id, auction.id);
        assert_eq!(outbox[0].status, OutboxStatus::Pending);
    }

    #[test]
    fn unknown_auction_is_not_found() {
        let (store, _) = manual_store();
        assert!(matches!(
            store.load_auction("nope"),
            Err(CoordinatorError::NotFound(_))
        ));
        assert!(matches!(
            store.place_bid("nope", "bob", 100),
            Err(CoordinatorError::NotFound(_))
        ));
    }

    #[test]
    fn seller_cannot_bid_on_own_auction() {
        let (store, clock) = manual_store();
        let auction = store
            .create_auction("alice", 0, hour_from(&clock), Item::default())
            .unwrap();

        let result = store.place_bid(&auction.id, "alice", 100);
        assert!(matches!(result, Err(CoordinatorError::InvalidBidder(_))));
        // Rejected before evaluation: no fact recorded, no event emitted.
        assert!(store.bids_for(&auction.id).unwrap().is_empty());
        assert_eq!(store.outbox().unwrap().len(), 1);
    }

    #[test]
    fn accepted_bid_updates_high_bid_and_emits() {
        let (store, clock) = manual_store();
        let auction = store
            .create_auction("alice", 0, hour_from(&clock), Item::default())
            .unwrap();

        let bid = store.place_bid(&auction.id, "bob", 500).unwrap();
        assert_eq!(bid.outcome, BidOutcome::Accepted);

        let reloaded = store.load_auction(&auction.id).unwrap();
        assert_eq!(reloaded.current_high_bid, Some(500));
        assert_eq!(reloaded.winner.as_deref(), Some("bob"));
        assert_eq!(store.high_bid(&auction.id).unwrap(), Some(500));

        let types = store
            .outbox()
            .unwrap()
            .iter()
            .map(|m| m.event_type.clone())
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["AuctionCreated", "BidPlaced"]);
    }

    #[test]
    fn rejected_bid_is_recorded_but_state_unchanged() {
        let (store, clock) = manual_store();
        let auction = store
            .create_auction("alice", 0, hour_from(&clock), Item::default())
            .unwrap();
        store.place_bid(&auction.id, "bob", 500).unwrap();

        let low = store.place_bid(&auction.id, "carol", 400).unwrap();
        assert_eq!(low.outcome, BidOutcome::TooLow);

        let reloaded = store.load_auction(&auction.id).unwrap();
        assert_eq!(reloaded.current_high_bid, Some(500));
        assert_eq!(reloaded.winner.as_deref(), Some("bob"));
        assert_eq!(store.bids_for(&auction.id).unwrap().len(), 2);
    }

    #[test]
    fn failed_txn_persists_nothing() {
        let (store, clock) = manual_store();
        let auction = store
            .create_auction("alice", 0, hour_from(&clock), Item::default())
            .unwrap();

        let result: Result<(), _> = store.with_auction(&auction.id, |a, txn| {
            a.current_high_bid = Some(9_999);
            txn.emit(DomainEvent::finished(a, SystemTime::UNIX_EPOCH));
            Err(CoordinatorError::Codec("boom".into()))
        });
        assert!(result.is_err());

        assert_eq!(store.load_auction(&auction.id).unwrap().current_high_bid, None);
        assert_eq!(store.outbox().unwrap().len(), 1);
    }

    #[test]
    fn contended_auction_conflicts_after_bounded_wait() {
        let (store, clock) = manual_store();
        let store = store.with_lock_timeout(Duration::from_millis(50));
        let auction = store
            .create_auction("alice", 0, hour_from(&clock), Item::default())
            .unwrap();

        let id = auction.id.clone();
        let holder = store.clone();
        let held_id = id.clone();
        let handle = thread::spawn(move || {
            holder
                .with_auction(&held_id, |_, _| {
                    thread::sleep(Duration::from_millis(300));
                    Ok(())
                })
                .unwrap();
        });

        // Give the holder time to take the lock.
        thread::sleep(Duration::from_millis(50));
        let result = store.place_bid(&id, "bob", 100);
        assert!(matches!(result, Err(CoordinatorError::Conflict(_))));
        handle.join().unwrap();

        // After the writer releases, the bid goes through.
        assert!(store.place_bid(&id, "bob", 100).is_ok());
    }

    #[test]
    fn update_is_seller_only() {
        let (store, clock) = manual_store();
        let auction = store
            .create_auction("alice", 0, hour_from(&clock), Item::default())
            .unwrap();

        let changes = ItemChanges {
            color: Some("red".into()),
            ..ItemChanges::default()
        };
        let result = store.update_auction(&auction.id, "mallory", changes.clone());
        assert!(matches!(result, Err(CoordinatorError::NotSeller(_))));

        let updated = store.update_auction(&auction.id, "alice", changes).unwrap();
        assert_eq!(updated.item.color, "red");
    }

    #[test]
    fn delete_removes_and_emits() {
        let (store, clock) = manual_store();
        let auction = store
            .create_auction("alice", 0, hour_from(&clock), Item::default())
            .unwrap();

        store.delete_auction(&auction.id, "alice").unwrap();
        assert!(matches!(
            store.load_auction(&auction.id),
            Err(CoordinatorError::NotFound(_))
        ));

        let types = store
            .outbox()
            .unwrap()
            .iter()
            .map(|m| m.event_type.clone())
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["AuctionCreated", "AuctionDeleted"]);
    }

    #[test]
    fn bid_after_end_records_fact_without_state_change() {
        let (store, clock) = manual_store();
        let auction = store
            .create_auction("alice", 0, hour_from(&clock), Item::default())
            .unwrap();

        clock.advance(Duration::from_secs(7_200));
        let bid = store.place_bid(&auction.id, "bob", 500).unwrap();
        assert_eq!(bid.outcome, BidOutcome::Finished);

        let reloaded = store.load_auction(&auction.id).unwrap();
        assert_eq!(reloaded.current_high_bid, None);
        assert_eq!(reloaded.status, AuctionStatus::Live);
        assert_eq!(store.bids_for(&auction.id).unwrap().len(), 1);
    }

    #[test]
    fn watermark_query_filters_by_updated_at() {
        let (store, clock) = manual_store();
        let first = store
            .create_auction("alice", 0, hour_from(&clock), Item::default())
            .unwrap();
        let mark = clock.now();

        clock.advance(Duration::from_secs(10));
        let second = store
            .create_auction("bob", 0, hour_from(&clock), Item::default())
            .unwrap();

        let all = store.auctions_updated_after(None).unwrap();
        assert_eq!(all.len(), 2);

        let fresh = store.auctions_updated_after(Some(mark)).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, second.id);
        assert_ne!(fresh[0].id, first.id);
    }
}

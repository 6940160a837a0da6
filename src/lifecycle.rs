//! Auction lifecycle driver.
//!
//! Moves auctions from `Live` to `Finished` once their end time passes,
//! finalizes the winner, and appends the terminal `AuctionFinished` event —
//! all inside one store transaction per auction. Closing is idempotent:
//! lifecycle polling is itself at-least-once, and a second driver finding an
//! already-finished auction does nothing.

use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::auction::AuctionStatus;
use crate::clock::Clock;
use crate::error::CoordinatorError;
use crate::events::DomainEvent;
use crate::store::AuctionStore;

/// Close every live auction whose end time has passed. Returns how many
/// auctions were closed by this call.
///
/// Contended or concurrently deleted auctions are skipped; the next tick
/// retries them.
pub fn close_due_auctions(
    store: &AuctionStore,
    clock: &dyn Clock,
) -> Result<usize, CoordinatorError> {
    let now = clock.now();
    let due = store.due_auctions(now)?;
    let mut closed = 0;

    for id in due {
        let result = store.with_auction(&id, |auction, txn| {
            if auction.status == AuctionStatus::Finished {
                // Another driver instance got here first.
                return Ok(false);
            }

            auction.status = AuctionStatus::Finished;
            // The winner designation was maintained bid by bid: it is set
            // exactly when the high bid exceeded the reserve.
            auction.sold_amount = if auction.winner.is_some() {
                auction.current_high_bid
            } else {
                None
            };
            auction.updated_at = now;

            txn.emit(DomainEvent::finished(auction, now));
            Ok(true)
        });

        match result {
            Ok(true) => {
                info!(auction_id = %id, "auction closed");
                closed += 1;
            }
            Ok(false) => {}
            Err(CoordinatorError::Conflict(_)) | Err(CoordinatorError::NotFound(_)) => {
                debug!(auction_id = %id, "skipping contended or removed auction");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(closed)
}

/// Scheduler thread ticking [`close_due_auctions`] at a fixed interval.
pub struct LifecycleWorker {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<usize>>,
}

impl LifecycleWorker {
    pub fn spawn<C>(store: AuctionStore, clock: C, tick: Duration) -> Self
    where
        C: Clock + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut total_closed = 0;
            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                match close_due_auctions(&store, &clock) {
                    Ok(closed) => total_closed += closed,
                    Err(err) => warn!(error = %err, "lifecycle tick failed"),
                }

                thread::sleep(tick);
            }
            total_closed
        });

        LifecycleWorker {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop the scheduler; returns the total number of auctions it closed.
    pub fn stop(mut self) -> usize {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            0
        }
    }
}

impl Drop for LifecycleWorker {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::Item;
    use crate::clock::ManualClock;
    use crate::events::AuctionFinished;
    use std::time::SystemTime;

    fn setup() -> (AuctionStore, ManualClock) {
        let clock = ManualClock::at(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
        let store = AuctionStore::with_clock(clock.clone());
        (store, clock)
    }

    fn finished_events(store: &AuctionStore) -> Vec<AuctionFinished> {
        store
            .outbox()
            .unwrap()
            .iter()
            .filter(|m| m.event_type == "AuctionFinished")
            .map(|m| match DomainEvent::decode(&m.payload).unwrap() {
                DomainEvent::AuctionFinished(e) => e,
                other => panic!("unexpected event: {:?}", other),
            })
            .collect()
    }

    #[test]
    fn closes_due_auction_with_winner() {
        let (store, clock) = setup();
        let auction = store
            .create_auction("alice", 1_000, clock.now() + Duration::from_secs(60), Item::default())
            .unwrap();
        store.place_bid(&auction.id, "bob", 1_500).unwrap();

        clock.advance(Duration::from_secs(120));
        let closed = close_due_auctions(&store, &clock).unwrap();
        assert_eq!(closed, 1);

        let reloaded = store.load_auction(&auction.id).unwrap();
        assert_eq!(reloaded.status, AuctionStatus::Finished);
        assert_eq!(reloaded.winner.as_deref(), Some("bob"));
        assert_eq!(reloaded.sold_amount, Some(1_500));

        let events = finished_events(&store);
        assert_eq!(events.len(), 1);
        assert!(events[0].item_sold);
        assert_eq!(events[0].winner.as_deref(), Some("bob"));
        assert_eq!(events[0].amount, Some(1_500));
    }

    #[test]
    fn reserve_not_met_closes_without_winner() {
        let (store, clock) = setup();
        let auction = store
            .create_auction("alice", 1_000, clock.now() + Duration::from_secs(60), Item::default())
            .unwrap();
        store.place_bid(&auction.id, "bob", 500).unwrap();

        clock.advance(Duration::from_secs(120));
        close_due_auctions(&store, &clock).unwrap();

        let reloaded = store.load_auction(&auction.id).unwrap();
        assert_eq!(reloaded.status, AuctionStatus::Finished);
        assert_eq!(reloaded.winner, None);
        assert_eq!(reloaded.sold_amount, None);
        assert_eq!(reloaded.current_high_bid, Some(500));

        let events = finished_events(&store);
        assert!(!events[0].item_sold);
        assert_eq!(events[0].winner, None);
    }

    #[test]
    fn closing_is_idempotent() {
        let (store, clock) = setup();
        store
            .create_auction("alice", 0, clock.now() + Duration::from_secs(60), Item::default())
            .unwrap();

        clock.advance(Duration::from_secs(120));
        assert_eq!(close_due_auctions(&store, &clock).unwrap(), 1);
        assert_eq!(close_due_auctions(&store, &clock).unwrap(), 0);
        assert_eq!(finished_events(&store).len(), 1);
    }

    #[test]
    fn live_auctions_are_untouched() {
        let (store, clock) = setup();
        let auction = store
            .create_auction("alice", 0, clock.now() + Duration::from_secs(600), Item::default())
            .unwrap();

        assert_eq!(close_due_auctions(&store, &clock).unwrap(), 0);
        assert!(store.load_auction(&auction.id).unwrap().is_live());
    }

    #[test]
    fn no_accepted_bids_after_close() {
        let (store, clock) = setup();
        let auction = store
            .create_auction("alice", 0, clock.now() + Duration::from_secs(60), Item::default())
            .unwrap();

        clock.advance(Duration::from_secs(120));
        close_due_auctions(&store, &clock).unwrap();

        let bid = store.place_bid(&auction.id, "bob", 10_000).unwrap();
        assert_eq!(bid.outcome, crate::auction::BidOutcome::Finished);
        assert_eq!(store.load_auction(&auction.id).unwrap().current_high_bid, None);
    }

    #[test]
    fn worker_closes_on_tick() {
        let (store, clock) = setup();
        store
            .create_auction("alice", 0, clock.now() + Duration::from_secs(60), Item::default())
            .unwrap();
        clock.advance(Duration::from_secs(120));

        let worker = LifecycleWorker::spawn(store.clone(), clock.clone(), Duration::from_millis(10));

        // Wait for at least one tick to observe the close.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let all_closed = store
                .auctions_updated_after(None)
                .unwrap()
                .iter()
                .all(|a| a.status == AuctionStatus::Finished);
            if all_closed || std::time::Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let closed = worker.stop();
        assert_eq!(closed, 1);
    }
}

//! Bid evaluation.
//!
//! [`evaluate`] is a pure function over the auction snapshot, the prior high
//! bid, and the proposed amount — no I/O, no clock reads. The same inputs
//! always produce the same outcome, which is what lets the store re-run an
//! evaluation safely after a lock retry.
//!
//! Seller-bids-on-own-auction is caller-level validation
//! ([`CoordinatorError::InvalidBidder`](crate::CoordinatorError)), not an
//! outcome: it rejects the request before any fact is recorded.

use std::time::SystemTime;

use crate::auction::{Auction, AuctionStatus, BidOutcome};

/// Evaluate a proposed bid against an auction snapshot.
///
/// Rules, in order:
/// 1. Ended auctions (by status or by `auction_end < now`) yield
///    [`BidOutcome::Finished`]; the bid is a no-op fact.
/// 2. An amount that does not strictly exceed the prior high bid is
///    [`BidOutcome::TooLow`]. Equal amounts lose — displacing the high bid
///    requires strictly more, so the ordering of equal bids arriving out of
///    order never matters.
/// 3. Otherwise the bid is the new high bid: [`BidOutcome::Accepted`] when
///    the amount strictly exceeds the reserve (or there is none),
///    [`BidOutcome::AcceptedBelowReserve`] when it is at or below it.
pub fn evaluate(
    auction: &Auction,
    prior_high: Option<u64>,
    amount: u64,
    now: SystemTime,
) -> BidOutcome {
    if auction.status == AuctionStatus::Finished || auction.auction_end < now {
        return BidOutcome::Finished;
    }

    if let Some(high) = prior_high {
        if amount <= high {
            return BidOutcome::TooLow;
        }
    }

    if !auction.has_reserve() || amount > auction.reserve_price {
        BidOutcome::Accepted
    } else {
        BidOutcome::AcceptedBelowReserve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::Item;
    use std::time::Duration;

    fn live_auction(reserve: u64) -> Auction {
        let now = SystemTime::UNIX_EPOCH;
        Auction::new(
            "auction-1",
            "alice",
            reserve,
            now + Duration::from_secs(3_600),
            Item::default(),
            now,
        )
    }

    #[test]
    fn first_bid_below_reserve_is_accepted_below_reserve() {
        let auction = live_auction(1_000);
        let outcome = evaluate(&auction, None, 500, SystemTime::UNIX_EPOCH);
        assert_eq!(outcome, BidOutcome::AcceptedBelowReserve);
    }

    #[test]
    fn bid_above_reserve_is_accepted() {
        let auction = live_auction(1_000);
        let outcome = evaluate(&auction, Some(500), 1_200, SystemTime::UNIX_EPOCH);
        assert_eq!(outcome, BidOutcome::Accepted);
    }

    #[test]
    fn bid_equal_to_reserve_does_not_meet_it() {
        // Reserve is met only by strictly greater amounts.
        let auction = live_auction(1_000);
        let outcome = evaluate(&auction, None, 1_000, SystemTime::UNIX_EPOCH);
        assert_eq!(outcome, BidOutcome::AcceptedBelowReserve);
    }

    #[test]
    fn equal_amounts_are_too_low() {
        let auction = live_auction(0);
        assert_eq!(
            evaluate(&auction, Some(1_200), 1_200, SystemTime::UNIX_EPOCH),
            BidOutcome::TooLow
        );
        assert_eq!(
            evaluate(&auction, Some(1_200), 1_201, SystemTime::UNIX_EPOCH),
            BidOutcome::Accepted
        );
    }

    #[test]
    fn lower_amount_is_too_low() {
        let auction = live_auction(0);
        assert_eq!(
            evaluate(&auction, Some(1_000), 900, SystemTime::UNIX_EPOCH),
            BidOutcome::TooLow
        );
    }

    #[test]
    fn ended_auction_yields_finished() {
        let mut auction = live_auction(0);
        auction.auction_end = SystemTime::UNIX_EPOCH;

        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        assert_eq!(evaluate(&auction, None, 500, later), BidOutcome::Finished);
    }

    #[test]
    fn finished_status_yields_finished_even_before_end_time() {
        let mut auction = live_auction(0);
        auction.status = AuctionStatus::Finished;
        assert_eq!(
            evaluate(&auction, None, 500, SystemTime::UNIX_EPOCH),
            BidOutcome::Finished
        );
    }

    #[test]
    fn no_reserve_accepts_any_new_high_bid() {
        let auction = live_auction(0);
        assert_eq!(
            evaluate(&auction, None, 1, SystemTime::UNIX_EPOCH),
            BidOutcome::Accepted
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let auction = live_auction(1_000);
        let first = evaluate(&auction, Some(700), 900, SystemTime::UNIX_EPOCH);
        for _ in 0..10 {
            assert_eq!(evaluate(&auction, Some(700), 900, SystemTime::UNIX_EPOCH), first);
        }
    }
}

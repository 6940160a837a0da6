//! Auction domain model.
//!
//! The `Auction` is the only mutable aggregate in the system; it is owned by
//! the [`AuctionStore`](crate::AuctionStore) and mutated exclusively through
//! its transactional entry points. `Bid`s are append-only facts — recorded
//! once with their outcome, never edited.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an auction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionStatus {
    #[default]
    Live,
    Finished,
}

/// The thing being sold.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub make: String,
    pub model: String,
    pub year: u32,
    pub color: String,
    pub mileage: u32,
    pub image_url: String,
}

/// Canonical auction state, including the denormalized high-bid fields that
/// the bid evaluator and lifecycle driver maintain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Auction {
    pub id: String,
    pub seller: String,
    /// Minimum sale amount. Zero means no reserve.
    pub reserve_price: u64,
    pub auction_end: SystemTime,
    pub status: AuctionStatus,
    /// Highest amount seen so far, accepted at or below reserve.
    /// Monotonically non-decreasing while the auction is live.
    pub current_high_bid: Option<u64>,
    /// Set only while the high bid exceeds the reserve.
    pub winner: Option<String>,
    /// Final sale amount, set by the lifecycle driver at close.
    pub sold_amount: Option<u64>,
    pub item: Item,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Auction {
    pub fn new(
        id: impl Into<String>,
        seller: impl Into<String>,
        reserve_price: u64,
        auction_end: SystemTime,
        item: Item,
        now: SystemTime,
    ) -> Self {
        Auction {
            id: id.into(),
            seller: seller.into(),
            reserve_price,
            auction_end,
            status: AuctionStatus::Live,
            current_high_bid: None,
            winner: None,
            sold_amount: None,
            item,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == AuctionStatus::Live
    }

    pub fn has_reserve(&self) -> bool {
        self.reserve_price > 0
    }
}

/// Outcome assigned to a bid at evaluation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidOutcome {
    /// New high bid, above the reserve. The bidder becomes the current winner.
    Accepted,
    /// New high bid, but at or below the reserve — no sale yet.
    AcceptedBelowReserve,
    /// Did not beat the current high bid. Equal amounts lose the tie.
    TooLow,
    /// The auction had already ended; recorded as a fact, state untouched.
    Finished,
}

impl BidOutcome {
    /// Whether this outcome moved the auction's high bid.
    pub fn is_accepted(&self) -> bool {
        matches!(self, BidOutcome::Accepted | BidOutcome::AcceptedBelowReserve)
    }
}

/// An immutable bid fact. Every submitted bid is recorded with its outcome,
/// including rejections, for audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    pub auction_id: String,
    pub bidder: String,
    pub amount: u64,
    pub outcome: BidOutcome,
    pub placed_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_auction_is_live_with_no_bids() {
        let now = SystemTime::UNIX_EPOCH;
        let auction = Auction::new(
            "auction-1",
            "alice",
            1_000,
            now + Duration::from_secs(3_600),
            Item::default(),
            now,
        );

        assert!(auction.is_live());
        assert!(auction.has_reserve());
        assert_eq!(auction.current_high_bid, None);
        assert_eq!(auction.winner, None);
        assert_eq!(auction.sold_amount, None);
    }

    #[test]
    fn zero_reserve_means_no_reserve() {
        let now = SystemTime::UNIX_EPOCH;
        let auction = Auction::new("a", "s", 0, now, Item::default(), now);
        assert!(!auction.has_reserve());
    }

    #[test]
    fn accepted_outcomes() {
        assert!(BidOutcome::Accepted.is_accepted());
        assert!(BidOutcome::AcceptedBelowReserve.is_accepted());
        assert!(!BidOutcome::TooLow.is_accepted());
        assert!(!BidOutcome::Finished.is_accepted());
    }
}

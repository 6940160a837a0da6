//! Domain event schemas.
//!
//! These are the contracts that cross service boundaries: the auction
//! service appends them to its outbox, and the search and notification
//! consumers fold them into their own state. Payloads travel as bitcode
//! bytes inside a transport [`Event`](crate::transport::Event) envelope.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::auction::{Auction, Bid, BidOutcome};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionCreated {
    pub auction_id: String,
    pub seller: String,
    pub reserve_price: u64,
    pub auction_end: SystemTime,
    pub make: String,
    pub model: String,
    pub year: u32,
    pub color: String,
    pub mileage: u32,
    pub image_url: String,
    pub created_at: SystemTime,
}

/// Item fields changed by the seller. `None` means unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionUpdated {
    pub auction_id: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<u32>,
    pub color: Option<String>,
    pub mileage: Option<u32>,
    pub updated_at: SystemTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionDeleted {
    pub auction_id: String,
    pub deleted_at: SystemTime,
}

/// Terminal event: the lifecycle driver closed the auction.
/// `winner` and `amount` are `None` when the reserve was never exceeded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionFinished {
    pub auction_id: String,
    pub item_sold: bool,
    pub winner: Option<String>,
    pub amount: Option<u64>,
    pub finished_at: SystemTime,
}

/// Interim event for UI updates; every recorded bid produces one,
/// whatever its outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BidPlaced {
    pub auction_id: String,
    pub bidder: String,
    pub amount: u64,
    pub outcome: BidOutcome,
    pub placed_at: SystemTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    AuctionCreated(AuctionCreated),
    AuctionUpdated(AuctionUpdated),
    AuctionDeleted(AuctionDeleted),
    AuctionFinished(AuctionFinished),
    BidPlaced(BidPlaced),
}

impl DomainEvent {
    /// Wire name for this event, used as the transport envelope's type tag
    /// and as the notification channel name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::AuctionCreated(_) => "AuctionCreated",
            DomainEvent::AuctionUpdated(_) => "AuctionUpdated",
            DomainEvent::AuctionDeleted(_) => "AuctionDeleted",
            DomainEvent::AuctionFinished(_) => "AuctionFinished",
            DomainEvent::BidPlaced(_) => "BidPlaced",
        }
    }

    pub fn auction_id(&self) -> &str {
        match self {
            DomainEvent::AuctionCreated(e) => &e.auction_id,
            DomainEvent::AuctionUpdated(e) => &e.auction_id,
            DomainEvent::AuctionDeleted(e) => &e.auction_id,
            DomainEvent::AuctionFinished(e) => &e.auction_id,
            DomainEvent::BidPlaced(e) => &e.auction_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bitcode::Error> {
        bitcode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bitcode::Error> {
        bitcode::deserialize(bytes)
    }

    pub fn created(auction: &Auction) -> Self {
        DomainEvent::AuctionCreated(AuctionCreated {
            auction_id: auction.id.clone(),
            seller: auction.seller.clone(),
            reserve_price: auction.reserve_price,
            auction_end: auction.auction_end,
            make: auction.item.make.clone(),
            model: auction.item.model.clone(),
            year: auction.item.year,
            color: auction.item.color.clone(),
            mileage: auction.item.mileage,
            image_url: auction.item.image_url.clone(),
            created_at: auction.created_at,
        })
    }

    pub fn finished(auction: &Auction, now: SystemTime) -> Self {
        DomainEvent::AuctionFinished(AuctionFinished {
            auction_id: auction.id.clone(),
            item_sold: auction.winner.is_some(),
            winner: auction.winner.clone(),
            amount: auction.sold_amount,
            finished_at: now,
        })
    }

    pub fn bid_placed(bid: &Bid) -> Self {
        DomainEvent::BidPlaced(BidPlaced {
            auction_id: bid.auction_id.clone(),
            bidder: bid.bidder.clone(),
            amount: bid.amount,
            outcome: bid.outcome,
            placed_at: bid.placed_at,
        })
    }
}

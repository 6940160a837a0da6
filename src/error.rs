//! Error taxonomy for the coordination core.
//!
//! Business-rule rejections (`NotFound`, `InvalidBidder`, `NotSeller`) are
//! surfaced to the caller and never retried. `Conflict` means a bounded lock
//! wait expired; callers may retry with backoff. Transport failures are
//! retried by the outbox and inbox workers up to policy limits — they reach
//! callers only through [`CoordinatorError::Transport`] on direct publishes.

use thiserror::Error;

use crate::transport::PublishError;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("auction not found: {0}")]
    NotFound(String),

    #[error("seller {0} cannot bid on their own auction")]
    InvalidBidder(String),

    #[error("{0} is not the seller of this auction")]
    NotSeller(String),

    #[error("auction {0} is held by a concurrent writer, retry with backoff")]
    Conflict(String),

    #[error("transport failure")]
    Transport(#[from] PublishError),

    #[error("payload codec failure: {0}")]
    Codec(String),

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

impl From<bitcode::Error> for CoordinatorError {
    fn from(err: bitcode::Error) -> Self {
        CoordinatorError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_auction() {
        let err = CoordinatorError::NotFound("auction-9".into());
        assert_eq!(err.to_string(), "auction not found: auction-9");
    }

    #[test]
    fn conflict_mentions_retry() {
        let err = CoordinatorError::Conflict("auction-1".into());
        assert!(err.to_string().contains("retry"));
    }
}

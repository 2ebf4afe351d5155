//! # Lattice Event System Errors
use thiserror::Error;

use crate::event::SubscriptionId;

#[derive(Debug, Clone, Error)]
pub enum EventSystemError {
    #[error("no subscription with id {0}")]
    SubscriptionNotFound(SubscriptionId),
}

//! Error types for `RideSync` core library.

use thiserror::Error;

use crate::model::{RideStatus, RideTransition};

/// Result type alias using `RideSync` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `RideSync` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected before reaching the store
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-side validation failures. Never cause a store round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Pickup location is required")]
    EmptyPickup,

    #[error("Destination is required")]
    EmptyDestination,

    #[error("Passenger count must be at least 1 (got {0})")]
    InvalidPassengerCount(i64),

    #[error("Cannot {transition} a ride that is {from}")]
    InvalidTransition {
        from: RideStatus,
        transition: RideTransition,
    },
}

//! `RideSync` Core Library
//!
//! Shared functionality for `RideSync` components:
//! - Ride and activity-log domain model with typed lifecycle states
//! - Principals, roles and capability checks
//! - The record-store seam and change-feed subscriptions
//! - Configuration resolution and hierarchy
//! - Common error types and database helpers

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod identity;
pub mod model;
pub mod store;
pub mod tracing_init;

pub use config::Config;
pub use db::StoreError;
pub use error::{Error, Result, ValidationError};
pub use feed::{ChangeEvent, ChangeKind, ChangeKinds, FeedItem, Keyed, Subscription};
pub use identity::{AuthProvider, Principal, Role, RoleDirectory, RoleSet};
pub use model::{
    ActionType, ActivityLogEntry, NewRide, RideFilter, RideId, RidePatch, RideRequest,
    RideStatus, RideTransition, UserId,
};
pub use store::RecordStore;

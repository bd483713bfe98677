//! `RideSync` synchronization engines.
//!
//! - [`IdentityContext`]: sequenced session and role resolution
//! - [`RideSyncEngine`]: per-client ride cache kept in step with the store
//!   through subscribe-and-reconcile, plus the lifecycle mutations
//! - [`ActivityFeed`]: bounded mirror of the activity log for privileged roles
//! - [`Dashboard`]: role-specific consumer of both engines

pub mod activity;
mod client;
pub mod dashboard;
pub mod error;
pub mod identity;
pub mod rides;
pub mod views;

pub use activity::{ActivityFeed, ActivitySnapshot, ActivityWindow};
pub use dashboard::{Changes, Dashboard, DashboardKind, DashboardView, Notice, toast};
pub use error::{Operation, RideError};
pub use identity::{IdentityContext, IdentityState};
pub use rides::{MutationOutcome, RideCache, RideSnapshot, RideSyncEngine};
pub use views::RideCounts;

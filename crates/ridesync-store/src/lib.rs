//! `RideSync` backing store.
//!
//! `SQLite` tables for ride requests, the activity log and user roles, with
//! row-level policies applied to every statement and a broadcast change feed
//! published after each commit.

pub mod auth;
pub mod db;
pub mod feed;
pub mod models;
mod policy;
pub mod queries;
pub mod store;

pub use auth::{LocalAuth, SqliteRoleDirectory};
pub use db::Database;
pub use feed::{ChangeHub, FeedStats};
pub use queries::WriteOutcome;
pub use store::SqliteStore;

//! `RideSync` CLI Library
//!
//! Command implementations behind the `ridesync` binary. Every command opens
//! a [`session::Session`] on the local ride store and acts as the user named
//! by `--as`.

pub mod activity_cmd;
pub mod ride_cmd;
pub mod role_cmd;
pub mod session;

//! Errors surfaced by the engines to their consumers.

use std::fmt;

use ridesync_core::db::StoreError;
use ridesync_core::error::ValidationError;
use ridesync_core::model::RideTransition;

/// User-facing operations, used to label failures and pending flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    LoadRides,
    RequestRide,
    AcceptRide,
    StartRide,
    CompleteRide,
    CancelRide,
    LoadActivity,
}

impl Operation {
    pub const fn for_transition(transition: RideTransition) -> Self {
        match transition {
            RideTransition::Accept => Self::AcceptRide,
            RideTransition::Start => Self::StartRide,
            RideTransition::Complete => Self::CompleteRide,
            RideTransition::Cancel => Self::CancelRide,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoadRides => "load rides",
            Self::RequestRide => "request ride",
            Self::AcceptRide => "accept ride",
            Self::StartRide => "start ride",
            Self::CompleteRide => "complete ride",
            Self::CancelRide => "cancel ride",
            Self::LoadActivity => "load activity",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RideError {
    /// No principal is bound; raised before any store call.
    #[error("Not signed in")]
    Authentication,

    /// Rejected input or an illegal lifecycle transition.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The principal lacks the role, or the row policy refused the write.
    #[error("Failed to {operation}: {reason}")]
    Forbidden {
        operation: Operation,
        reason: String,
    },

    /// The backing store failed or timed out.
    #[error("Failed to {operation}: {source}")]
    Store {
        operation: Operation,
        #[source]
        source: StoreError,
    },
}

impl RideError {
    pub const fn store(operation: Operation, source: StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub fn forbidden(operation: Operation, reason: impl Into<String>) -> Self {
        Self::Forbidden {
            operation,
            reason: reason.into(),
        }
    }

    /// The operation this error is attributed to, if any.
    pub const fn operation(&self) -> Option<Operation> {
        match self {
            Self::Forbidden { operation, .. } | Self::Store { operation, .. } => Some(*operation),
            Self::Authentication | Self::Validation(_) => None,
        }
    }
}

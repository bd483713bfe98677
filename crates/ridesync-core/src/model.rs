//! Domain model for ride requests and the activity log.
//!
//! Row shapes coming out of the store are stringly typed; everything here is
//! validated once at the store boundary and stays typed afterwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Error returned when a stored tag does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Server-assigned ride identifier.
    RideId
);
string_id!(
    /// Identity-provider user identifier.
    UserId
);

/// Lifecycle state of a ride request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub const ALL: [Self; 5] = [
        Self::Requested,
        Self::Accepted,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Statuses shown on "active" dashboard views.
    pub const ACTIVE: [Self; 3] = [Self::Requested, Self::Accepted, Self::InProgress];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether a ride in this status must carry a driver.
    pub const fn holds_driver(self) -> bool {
        matches!(self, Self::Accepted | Self::InProgress | Self::Completed)
    }

    /// Check that `transition` may be applied to a ride in this status.
    pub fn check(self, transition: RideTransition) -> Result<(), ValidationError> {
        if transition.from_states().contains(&self) {
            Ok(())
        } else {
            Err(ValidationError::InvalidTransition {
                from: self,
                transition,
            })
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("ride status", s))
    }
}

/// The four mutations that move a ride through its lifecycle after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideTransition {
    Accept,
    Start,
    Complete,
    Cancel,
}

impl RideTransition {
    /// Statuses this transition may leave from.
    pub const fn from_states(self) -> &'static [RideStatus] {
        match self {
            Self::Accept => &[RideStatus::Requested],
            Self::Start => &[RideStatus::Accepted],
            Self::Complete => &[RideStatus::InProgress],
            Self::Cancel => &RideStatus::ACTIVE,
        }
    }

    pub const fn target(self) -> RideStatus {
        match self {
            Self::Accept => RideStatus::Accepted,
            Self::Start => RideStatus::InProgress,
            Self::Complete => RideStatus::Completed,
            Self::Cancel => RideStatus::Cancelled,
        }
    }

    pub const fn action_type(self) -> ActionType {
        match self {
            Self::Accept => ActionType::RideAccepted,
            Self::Start => ActionType::RideStarted,
            Self::Complete => ActionType::RideCompleted,
            Self::Cancel => ActionType::RideCancelled,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for RideTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of activity-log tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    RideRequested,
    RideAccepted,
    RideStarted,
    RideCompleted,
    RideCancelled,
}

impl ActionType {
    pub const ALL: [Self; 5] = [
        Self::RideRequested,
        Self::RideAccepted,
        Self::RideStarted,
        Self::RideCompleted,
        Self::RideCancelled,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RideRequested => "ride_requested",
            Self::RideAccepted => "ride_accepted",
            Self::RideStarted => "ride_started",
            Self::RideCompleted => "ride_completed",
            Self::RideCancelled => "ride_cancelled",
        }
    }

    /// The action recorded when a ride enters `status`.
    pub const fn for_status(status: RideStatus) -> Self {
        match status {
            RideStatus::Requested => Self::RideRequested,
            RideStatus::Accepted => Self::RideAccepted,
            RideStatus::InProgress => Self::RideStarted,
            RideStatus::Completed => Self::RideCompleted,
            RideStatus::Cancelled => Self::RideCancelled,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("action type", s))
    }
}

/// One transportation request through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequest {
    pub id: RideId,
    pub rider_id: UserId,
    pub driver_id: Option<UserId>,
    pub pickup_location: String,
    pub destination: String,
    pub passenger_count: u32,
    pub status: RideStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RideRequest {
    /// Returns a description of the first violated row invariant, if any.
    pub fn invariant_violation(&self) -> Option<&'static str> {
        if self.driver_id.is_some() != self.status.holds_driver() {
            return Some("driver must be set exactly while accepted, in progress or completed");
        }
        if self.accepted_at.is_some() != self.driver_id.is_some() {
            return Some("accepted_at must be set exactly when a driver is set");
        }
        if self.completed_at.is_some() != (self.status == RideStatus::Completed) {
            return Some("completed_at must be set exactly when completed");
        }
        None
    }

    pub fn is_driven_by(&self, driver: &UserId) -> bool {
        self.driver_id.as_ref() == Some(driver)
    }
}

/// Validated payload for a new ride request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRide {
    pub pickup_location: String,
    pub destination: String,
    pub passenger_count: u32,
}

impl NewRide {
    pub const DEFAULT_PASSENGERS: u32 = 1;

    /// Trim and validate user input. `passenger_count` defaults to 1.
    pub fn new(
        pickup: &str,
        destination: &str,
        passenger_count: Option<i64>,
    ) -> Result<Self, ValidationError> {
        let pickup = pickup.trim();
        if pickup.is_empty() {
            return Err(ValidationError::EmptyPickup);
        }
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(ValidationError::EmptyDestination);
        }
        let passenger_count = match passenger_count {
            None => Self::DEFAULT_PASSENGERS,
            Some(n) => u32::try_from(n)
                .ok()
                .filter(|n| *n >= 1)
                .ok_or(ValidationError::InvalidPassengerCount(n))?,
        };
        Ok(Self {
            pickup_location: pickup.to_string(),
            destination: destination.to_string(),
            passenger_count,
        })
    }
}

/// Column changes applied by a conditional update.
///
/// `driver_id` and `accepted_at` use a nested option: `Some(None)` clears
/// the column, `None` leaves it untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RidePatch {
    pub status: Option<RideStatus>,
    pub driver_id: Option<Option<UserId>>,
    pub accepted_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RidePatch {
    /// Patch for `transition`. The actor becomes the driver on accept;
    /// cancel clears the driver so cancelled rows never hold one.
    pub fn for_transition(
        transition: RideTransition,
        actor: &UserId,
        now: DateTime<Utc>,
    ) -> Self {
        let status = Some(transition.target());
        match transition {
            RideTransition::Accept => Self {
                status,
                driver_id: Some(Some(actor.clone())),
                accepted_at: Some(Some(now)),
                completed_at: None,
            },
            RideTransition::Start => Self {
                status,
                ..Self::default()
            },
            RideTransition::Complete => Self {
                status,
                completed_at: Some(now),
                ..Self::default()
            },
            RideTransition::Cancel => Self {
                status,
                driver_id: Some(None),
                accepted_at: Some(None),
                completed_at: None,
            },
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.driver_id.is_none()
            && self.accepted_at.is_none()
            && self.completed_at.is_none()
    }
}

/// Equality predicates for ride selection and conditional updates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RideFilter {
    pub id: Option<RideId>,
    pub rider_id: Option<UserId>,
    pub driver_id: Option<UserId>,
    /// Empty means any status.
    pub statuses: Vec<RideStatus>,
}

impl RideFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: &RideId) -> Self {
        Self {
            id: Some(id.clone()),
            ..Self::default()
        }
    }

    pub fn for_rider(rider: &UserId) -> Self {
        Self {
            rider_id: Some(rider.clone()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_statuses(mut self, statuses: &[RideStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, ride: &RideRequest) -> bool {
        self.id.as_ref().is_none_or(|id| *id == ride.id)
            && self.rider_id.as_ref().is_none_or(|r| *r == ride.rider_id)
            && self
                .driver_id
                .as_ref()
                .is_none_or(|d| ride.is_driven_by(d))
            && (self.statuses.is_empty() || self.statuses.contains(&ride.status))
    }
}

/// Append-only audit record written by the store on every ride mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: i64,
    pub ride_id: RideId,
    pub action_type: ActionType,
    pub action_description: String,
    pub created_at: DateTime<Utc>,
}

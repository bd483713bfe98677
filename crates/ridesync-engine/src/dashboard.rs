//! Role dashboards: read the engines, issue mutations, report outcomes.
//!
//! Dashboards hold no ride state of their own and never retry; every
//! failure becomes a [`Notice`] for the user to act on.

use std::fmt;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::watch;

use ridesync_core::config::Config;
use ridesync_core::identity::{Principal, Role};
use ridesync_core::model::{ActivityLogEntry, RideId, RideRequest, UserId};
use ridesync_core::store::RecordStore;

use crate::activity::{ActivityFeed, ActivitySnapshot};
use crate::error::{Operation, RideError};
use crate::identity::IdentityContext;
use crate::rides::{MutationOutcome, RideCache, RideSnapshot, RideSyncEngine};
use crate::views::RideCounts;

/// Dashboard variant, chosen from the principal's roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardKind {
    Rider,
    Driver,
    Employer,
    Employee,
    Admin,
}

impl DashboardKind {
    const PRECEDENCE: [(Role, Self); 5] = [
        (Role::Admin, Self::Admin),
        (Role::Employer, Self::Employer),
        (Role::Driver, Self::Driver),
        (Role::Employee, Self::Employee),
        (Role::Rider, Self::Rider),
    ];

    /// Highest-precedence dashboard the principal qualifies for.
    pub fn for_principal(principal: &Principal) -> Option<Self> {
        Self::PRECEDENCE
            .into_iter()
            .find(|(role, _)| principal.has_role(*role))
            .map(|(_, kind)| kind)
    }

    pub const fn title(self) -> &'static str {
        match self {
            Self::Rider => "Rider dashboard",
            Self::Driver => "Driver dashboard",
            Self::Employer => "Employer dashboard",
            Self::Employee => "Employee dashboard",
            Self::Admin => "Admin dashboard",
        }
    }

    pub const fn shows_activity(self) -> bool {
        matches!(self, Self::Employer | Self::Admin)
    }
}

/// Message shown to the user after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Info(String),
    Error(String),
}

impl Notice {
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Success(msg) | Self::Info(msg) | Self::Error(msg) => msg,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// User-facing text for a failed operation.
pub fn toast(err: &RideError) -> String {
    match err {
        RideError::Authentication => "Please sign in".to_string(),
        RideError::Validation(e) => e.to_string(),
        RideError::Forbidden { .. } | RideError::Store { .. } => err.to_string(),
    }
}

fn notice<T>(result: Result<T, RideError>, success: impl FnOnce(T) -> Notice) -> Notice {
    match result {
        Ok(value) => success(value),
        Err(e) => Notice::Error(toast(&e)),
    }
}

/// A titled list of rides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: &'static str,
    pub rides: Vec<RideRequest>,
}

impl Section {
    fn new(title: &'static str, rides: Vec<&RideRequest>) -> Self {
        Self {
            title,
            rides: rides.into_iter().cloned().collect(),
        }
    }
}

/// Render-ready state of a dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardView {
    pub kind: DashboardKind,
    pub user: UserId,
    pub loading: bool,
    pub counts: RideCounts,
    pub sections: Vec<Section>,
    pub activity: Vec<ActivityLogEntry>,
    pub error: Option<String>,
}

impl fmt::Display for DashboardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.kind.title(), self.user)?;
        if self.loading {
            return writeln!(f, "Loading rides...");
        }
        if let Some(error) = &self.error {
            writeln!(f, "! {error}")?;
        }
        writeln!(
            f,
            "{} active, {} completed, {} cancelled",
            self.counts.active(),
            self.counts.completed,
            self.counts.cancelled
        )?;

        for section in &self.sections {
            writeln!(f)?;
            writeln!(f, "{} ({})", section.title, section.rides.len())?;
            if section.rides.is_empty() {
                writeln!(f, "  none")?;
            }
            for ride in &section.rides {
                writeln!(f, "  {}", RideLine(ride))?;
            }
        }

        if self.kind.shows_activity() {
            writeln!(f)?;
            writeln!(f, "Recent activity ({})", self.activity.len())?;
            for entry in &self.activity {
                writeln!(
                    f,
                    "  {}  {}",
                    entry.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    entry.action_description
                )?;
            }
        }
        Ok(())
    }
}

/// One-line rendering of a ride.
pub struct RideLine<'a>(pub &'a RideRequest);

impl fmt::Display for RideLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ride = self.0;
        write!(
            f,
            "{}  {:<11}  {} -> {}  ({} pax)",
            ride.id,
            ride.status.as_str(),
            ride.pickup_location,
            ride.destination,
            ride.passenger_count
        )?;
        if let Some(driver) = &ride.driver_id {
            write!(f, "  driver {driver}")?;
        }
        Ok(())
    }
}

/// Change notifications from a dashboard's engines.
pub struct Changes {
    rides: watch::Receiver<RideSnapshot>,
    activity: Option<watch::Receiver<ActivitySnapshot>>,
}

impl Changes {
    /// Wait for the next change. False once the engines are gone.
    pub async fn next(&mut self) -> bool {
        match &mut self.activity {
            Some(activity) => tokio::select! {
                changed = self.rides.changed() => changed.is_ok(),
                changed = activity.changed() => changed.is_ok(),
            },
            None => self.rides.changed().await.is_ok(),
        }
    }
}

/// Role dashboard over a mounted ride engine and, for privileged roles, an
/// activity feed.
pub struct Dashboard {
    kind: DashboardKind,
    principal: Principal,
    rides: RideSyncEngine,
    activity: Option<ActivityFeed>,
}

impl Dashboard {
    /// Mount the engines for the signed-in principal.
    pub fn mount(
        store: &Arc<dyn RecordStore>,
        identity: &IdentityContext,
        config: &Config,
    ) -> Result<Self, RideError> {
        let principal = identity.require_principal()?;
        let kind = DashboardKind::for_principal(&principal).ok_or_else(|| {
            RideError::forbidden(
                Operation::LoadRides,
                format!("{} has no roles", principal.id),
            )
        })?;

        let rides = RideSyncEngine::mount(Arc::clone(store), identity.subscribe(), &config.sync);
        let activity = kind.shows_activity().then(|| {
            ActivityFeed::mount(
                Arc::clone(store),
                identity.subscribe(),
                &config.sync,
                &config.activity,
            )
        });

        Ok(Self {
            kind,
            principal,
            rides,
            activity,
        })
    }

    pub const fn kind(&self) -> DashboardKind {
        self.kind
    }

    pub const fn rides(&self) -> &RideSyncEngine {
        &self.rides
    }

    pub const fn activity(&self) -> Option<&ActivityFeed> {
        self.activity.as_ref()
    }

    /// Wait for the first fetch of every mounted engine.
    pub async fn loaded(&self) {
        self.rides.loaded().await;
        if let Some(activity) = &self.activity {
            activity.loaded().await;
        }
    }

    /// Change notifications for every mounted engine. Changes published
    /// after this call are never missed.
    pub fn changes(&self) -> Changes {
        Changes {
            rides: self.rides.watch(),
            activity: self.activity.as_ref().map(ActivityFeed::watch),
        }
    }

    pub fn view(&self) -> DashboardView {
        let snapshot = self.rides.snapshot();
        let me = &self.principal.id;
        let sections = sections(self.kind, &snapshot.rides, me);
        let activity = self
            .activity
            .as_ref()
            .map(|feed| feed.snapshot().entries.iter().cloned().collect())
            .unwrap_or_default();

        DashboardView {
            kind: self.kind,
            user: me.clone(),
            loading: snapshot.loading,
            counts: snapshot.rides.counts(),
            sections,
            activity,
            error: snapshot.last_error.as_ref().map(toast),
        }
    }

    pub async fn request(
        &self,
        pickup: &str,
        destination: &str,
        passengers: Option<i64>,
    ) -> Notice {
        notice(
            self.rides.request_ride(pickup, destination, passengers).await,
            |ride| Notice::Success(format!("Ride {} requested", ride.id)),
        )
    }

    /// Accept a ride. A lost race is reported, not treated as failure.
    pub async fn accept(&self, id: &RideId) -> Notice {
        notice(self.rides.accept_ride(id).await, |outcome| match outcome {
            MutationOutcome::Applied => Notice::Success(format!("Ride {id} accepted")),
            MutationOutcome::NoOp => Notice::Info("Ride was already taken".to_string()),
        })
    }

    pub async fn start(&self, id: &RideId) -> Notice {
        notice(self.rides.start_ride(id).await, |()| {
            Notice::Success(format!("Ride {id} started"))
        })
    }

    pub async fn complete(&self, id: &RideId) -> Notice {
        notice(self.rides.complete_ride(id).await, |()| {
            Notice::Success(format!("Ride {id} completed"))
        })
    }

    pub async fn cancel(&self, id: &RideId) -> Notice {
        notice(self.rides.cancel_ride(id).await, |()| {
            Notice::Success(format!("Ride {id} cancelled"))
        })
    }

    pub async fn unmount(self) {
        self.rides.unmount().await;
        if let Some(activity) = self.activity {
            activity.unmount().await;
        }
    }
}

fn sections(kind: DashboardKind, rides: &RideCache, me: &UserId) -> Vec<Section> {
    match kind {
        DashboardKind::Rider | DashboardKind::Employee => vec![
            Section::new("My active rides", rides.active()),
            Section::new("Ride history", rides.history()),
        ],
        DashboardKind::Driver => vec![
            Section::new("Available rides", rides.available()),
            Section::new("My active rides", rides.driver_active(me)),
            Section::new(
                "My completed rides",
                rides
                    .completed()
                    .into_iter()
                    .filter(|r| r.is_driven_by(me))
                    .collect(),
            ),
        ],
        DashboardKind::Employer => vec![
            Section::new("Active rides", rides.active()),
            Section::new("Today", rides.today()),
        ],
        DashboardKind::Admin => vec![
            Section::new("Active rides", rides.active()),
            Section::new("Completed", rides.completed()),
            Section::new("Cancelled", rides.cancelled()),
        ],
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ridesync_core::db::StoreError;
    use ridesync_core::error::ValidationError;

    use super::*;

    #[test]
    fn kind_follows_role_precedence() {
        let kind = |roles: &[Role]| {
            DashboardKind::for_principal(&Principal::new("u", roles.iter().copied()))
        };
        assert_eq!(kind(&[Role::Rider, Role::Admin]), Some(DashboardKind::Admin));
        assert_eq!(kind(&[Role::Driver, Role::Employer]), Some(DashboardKind::Employer));
        assert_eq!(kind(&[Role::Rider, Role::Driver]), Some(DashboardKind::Driver));
        assert_eq!(kind(&[Role::Rider, Role::Employee]), Some(DashboardKind::Employee));
        assert_eq!(kind(&[Role::Rider]), Some(DashboardKind::Rider));
        assert_eq!(kind(&[]), None);
    }

    #[test]
    fn toasts() {
        assert_eq!(toast(&RideError::Authentication), "Please sign in");
        assert_eq!(
            toast(&ValidationError::EmptyPickup.into()),
            "Pickup location is required"
        );
        assert_eq!(
            toast(&RideError::store(
                Operation::AcceptRide,
                StoreError::Connection("offline".into())
            )),
            "Failed to accept ride: Connection error: offline"
        );
    }

    #[test]
    fn only_privileged_dashboards_show_activity() {
        assert!(DashboardKind::Admin.shows_activity());
        assert!(DashboardKind::Employer.shows_activity());
        assert!(!DashboardKind::Driver.shows_activity());
        assert!(!DashboardKind::Rider.shows_activity());
    }
}

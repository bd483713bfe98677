//! Views derived from the ride cache. Computed on demand, never stored.

use chrono::{Local, NaiveDate};

use ridesync_core::model::{RideRequest, RideStatus, UserId};

use crate::rides::RideCache;

impl RideCache {
    /// Requested, accepted or in progress.
    pub fn active(&self) -> Vec<&RideRequest> {
        self.select(|r| r.status.is_active())
    }

    pub fn completed(&self) -> Vec<&RideRequest> {
        self.with_status(RideStatus::Completed)
    }

    pub fn cancelled(&self) -> Vec<&RideRequest> {
        self.with_status(RideStatus::Cancelled)
    }

    /// Completed and cancelled rides.
    pub fn history(&self) -> Vec<&RideRequest> {
        self.select(|r| r.status.is_terminal())
    }

    /// The driver queue: rides nobody has accepted yet.
    pub fn available(&self) -> Vec<&RideRequest> {
        self.with_status(RideStatus::Requested)
    }

    /// Rides created on the local calendar day.
    pub fn today(&self) -> Vec<&RideRequest> {
        self.created_on(Local::now().date_naive())
    }

    pub fn created_on(&self, day: NaiveDate) -> Vec<&RideRequest> {
        self.select(|r| r.created_at.with_timezone(&Local).date_naive() == day)
    }

    /// Rides requested by `rider`.
    pub fn requested_by(&self, rider: &UserId) -> Vec<&RideRequest> {
        self.select(|r| r.rider_id == *rider)
    }

    /// Active rides assigned to `driver`.
    pub fn driver_active(&self, driver: &UserId) -> Vec<&RideRequest> {
        self.select(|r| r.is_driven_by(driver) && r.status.is_active())
    }

    pub fn counts(&self) -> RideCounts {
        RideCounts::of(self.iter())
    }

    fn with_status(&self, status: RideStatus) -> Vec<&RideRequest> {
        self.select(|r| r.status == status)
    }

    fn select(&self, keep: impl Fn(&RideRequest) -> bool) -> Vec<&RideRequest> {
        self.iter().filter(|r| keep(r)).collect()
    }
}

/// Per-status totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RideCounts {
    pub requested: usize,
    pub accepted: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl RideCounts {
    pub fn of<'a>(rides: impl IntoIterator<Item = &'a RideRequest>) -> Self {
        let mut counts = Self::default();
        for ride in rides {
            match ride.status {
                RideStatus::Requested => counts.requested += 1,
                RideStatus::Accepted => counts.accepted += 1,
                RideStatus::InProgress => counts.in_progress += 1,
                RideStatus::Completed => counts.completed += 1,
                RideStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub const fn active(&self) -> usize {
        self.requested + self.accepted + self.in_progress
    }

    pub const fn total(&self) -> usize {
        self.active() + self.completed + self.cancelled
    }
}

//! Row-level security for the ride and activity tables.
//!
//! Read and write policies are appended to every statement as an extra
//! `WHERE` conjunct, so rows an actor may not touch are simply not matched.
//! Checks that reject a statement outright (the `WITH CHECK` side) return
//! `StoreError::PermissionDenied`.

use sqlx::{QueryBuilder, Sqlite};

use ridesync_core::db::StoreError;
use ridesync_core::identity::{Principal, Role};
use ridesync_core::model::{RidePatch, RideStatus};

/// Append the read policy for `ride_requests`.
pub(crate) fn push_ride_read(qb: &mut QueryBuilder<'_, Sqlite>, actor: &Principal) {
    if actor.sees_all_rides() {
        qb.push("1 = 1");
    } else {
        qb.push("rider_id = ").push_bind(actor.id.0.clone());
    }
}

/// Append the write policy for `ride_requests` given the patch being applied.
///
/// - admins may write any row
/// - drivers may claim rows that are still requested, and otherwise only
///   write rows assigned to them
/// - the owning rider may only cancel
pub(crate) fn push_ride_write(
    qb: &mut QueryBuilder<'_, Sqlite>,
    actor: &Principal,
    patch: &RidePatch,
) {
    if actor.has_role(Role::Admin) {
        qb.push("1 = 1");
        return;
    }

    let mut clauses = 0;
    qb.push("(");
    if actor.has_role(Role::Driver) {
        if assigns_driver(patch) {
            qb.push("status = ").push_bind(RideStatus::Requested.as_str());
        } else {
            qb.push("driver_id = ").push_bind(actor.id.0.clone());
        }
        clauses += 1;
    }
    if is_pure_cancel(patch) {
        if clauses > 0 {
            qb.push(" OR ");
        }
        qb.push("rider_id = ").push_bind(actor.id.0.clone());
        clauses += 1;
    }
    if clauses == 0 {
        qb.push("1 = 0");
    }
    qb.push(")");
}

/// Reject patches that no row could legitimately accept from this actor.
pub(crate) fn check_write(actor: &Principal, patch: &RidePatch) -> Result<(), StoreError> {
    if patch.is_empty() {
        return Err(StoreError::Query("empty update".into()));
    }
    if let Some(Some(driver)) = &patch.driver_id {
        if actor.has_role(Role::Admin) {
            return Ok(());
        }
        if !actor.can_accept_rides() {
            return Err(StoreError::PermissionDenied(format!(
                "{} is not a driver",
                actor.id
            )));
        }
        if *driver != actor.id {
            return Err(StoreError::PermissionDenied(
                "drivers can only assign rides to themselves".into(),
            ));
        }
    }
    Ok(())
}

/// Insert policy: only riders and employees create ride requests.
pub(crate) fn check_insert(actor: &Principal) -> Result<(), StoreError> {
    if actor.can_request_rides() {
        Ok(())
    } else {
        Err(StoreError::PermissionDenied(format!(
            "{} cannot request rides",
            actor.id
        )))
    }
}

/// Read policy for `activity_log`.
pub(crate) fn can_read_activity(actor: &Principal) -> bool {
    actor.can_view_activity()
}

fn assigns_driver(patch: &RidePatch) -> bool {
    matches!(patch.driver_id, Some(Some(_)))
}

fn is_pure_cancel(patch: &RidePatch) -> bool {
    patch.status == Some(RideStatus::Cancelled) && patch.completed_at.is_none()
}

//! Database queries for the RideSync store.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use ridesync_core::db::{StoreError, now_millis, to_millis};
use ridesync_core::identity::{Principal, Role, RoleSet};
use ridesync_core::model::{
    ActionType, ActivityLogEntry, NewRide, RideFilter, RideId, RidePatch, RideRequest, UserId,
};

use super::db::Database;
use super::models::{ActivityRow, RideRow, RoleRow, decode_all};
use super::policy;

/// Rows changed by a committed write, with the audit entries it produced.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub rides: Vec<RideRequest>,
    pub activity: Vec<ActivityLogEntry>,
}

impl Database {
    // =========================================================================
    // Ride queries
    // =========================================================================

    /// Insert a new ride for `rider` and log the request.
    pub async fn insert_ride(
        &self,
        rider: &UserId,
        ride: &NewRide,
    ) -> Result<WriteOutcome, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = to_millis(now_millis());
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query_as::<_, RideRow>(
            r"
            INSERT INTO ride_requests
                (id, rider_id, pickup_location, destination, passenger_count, status,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'requested', ?, ?)
            RETURNING *
            ",
        )
        .bind(&id)
        .bind(rider.as_str())
        .bind(&ride.pickup_location)
        .bind(&ride.destination)
        .bind(i64::from(ride.passenger_count))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let ride = RideRequest::try_from(row)?;
        let entry =
            record_activity(&mut tx, &ride, ActionType::RideRequested, rider, now).await?;

        tx.commit().await?;
        Ok(WriteOutcome {
            rides: vec![ride],
            activity: vec![entry],
        })
    }

    /// Rides matching `filter` that `actor` may read, newest first.
    pub async fn select_rides(
        &self,
        actor: &Principal,
        filter: &RideFilter,
    ) -> Result<Vec<RideRequest>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM ride_requests WHERE ");
        push_filter(&mut qb, filter);
        qb.push(" AND ");
        policy::push_ride_read(&mut qb, actor);
        qb.push(" ORDER BY created_at DESC, rowid DESC");

        let rows = qb.build_query_as::<RideRow>().fetch_all(self.pool()).await?;
        decode_all(rows)
    }

    /// Conditional update. Only rows matching both `filter` and the write
    /// policy for `actor` change; the returned rides are exactly those rows.
    pub async fn update_rides(
        &self,
        actor: &Principal,
        patch: &RidePatch,
        filter: &RideFilter,
    ) -> Result<WriteOutcome, StoreError> {
        policy::check_write(actor, patch)?;
        let now = to_millis(now_millis());

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ride_requests SET updated_at = ");
        qb.push_bind(now);
        if let Some(status) = patch.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(driver) = &patch.driver_id {
            qb.push(", driver_id = ")
                .push_bind(driver.as_ref().map(|d| d.0.clone()));
        }
        if let Some(accepted_at) = patch.accepted_at {
            qb.push(", accepted_at = ")
                .push_bind(accepted_at.map(to_millis));
        }
        if let Some(completed_at) = patch.completed_at {
            qb.push(", completed_at = ").push_bind(to_millis(completed_at));
        }
        qb.push(" WHERE ");
        push_filter(&mut qb, filter);
        qb.push(" AND ");
        policy::push_ride_write(&mut qb, actor, patch);
        qb.push(" RETURNING *");

        let mut tx = self.pool().begin().await?;
        let rows = qb.build_query_as::<RideRow>().fetch_all(&mut *tx).await?;
        let rides: Vec<RideRequest> = decode_all(rows)?;

        let mut activity = Vec::new();
        if let Some(status) = patch.status {
            for ride in &rides {
                let action = ActionType::for_status(status);
                activity.push(record_activity(&mut tx, ride, action, &actor.id, now).await?);
            }
        }

        tx.commit().await?;
        Ok(WriteOutcome { rides, activity })
    }

    /// Physically remove a ride. Its activity log entries are kept.
    ///
    /// Maintenance only; the lifecycle never deletes rides.
    pub async fn delete_ride(&self, id: &RideId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM ride_requests WHERE id = ?")
            .bind(id.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Activity log queries
    // =========================================================================

    /// Most recent activity entries, newest first. Empty for actors the
    /// activity log is hidden from.
    pub async fn select_activity(
        &self,
        actor: &Principal,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, StoreError> {
        if !policy::can_read_activity(actor) {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT * FROM activity_log ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        decode_all(rows)
    }

    // =========================================================================
    // Role queries
    // =========================================================================

    /// Roles held by `user`. Unknown role names are skipped.
    pub async fn roles_for(&self, user: &UserId) -> Result<RoleSet, StoreError> {
        let rows = sqlx::query_as::<_, RoleRow>("SELECT * FROM user_roles WHERE user_id = ?")
            .bind(user.as_str())
            .fetch_all(self.pool())
            .await?;

        let mut roles = RoleSet::new();
        for row in rows {
            match row.role.parse::<Role>() {
                Ok(role) => {
                    roles.insert(role);
                }
                Err(e) => tracing::warn!(user_id = %user, error = %e, "Skipping unknown role"),
            }
        }
        Ok(roles)
    }

    /// Grant `role` to `user`. Returns false if it was already held.
    pub async fn grant_role(&self, user: &UserId, role: Role) -> Result<bool, StoreError> {
        let now = to_millis(now_millis());
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_roles (user_id, role, granted_at) VALUES (?, ?, ?)",
        )
        .bind(user.as_str())
        .bind(role.as_str())
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke `role` from `user`. Returns false if it was not held.
    pub async fn revoke_role(&self, user: &UserId, role: Role) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role = ?")
            .bind(user.as_str())
            .bind(role.as_str())
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &RideFilter) {
    qb.push("1 = 1");
    if let Some(id) = &filter.id {
        qb.push(" AND id = ").push_bind(id.0.clone());
    }
    if let Some(rider) = &filter.rider_id {
        qb.push(" AND rider_id = ").push_bind(rider.0.clone());
    }
    if let Some(driver) = &filter.driver_id {
        qb.push(" AND driver_id = ").push_bind(driver.0.clone());
    }
    if !filter.statuses.is_empty() {
        qb.push(" AND status IN (");
        let mut statuses = qb.separated(", ");
        for status in &filter.statuses {
            statuses.push_bind(status.as_str());
        }
        statuses.push_unseparated(")");
    }
}

async fn record_activity(
    conn: &mut SqliteConnection,
    ride: &RideRequest,
    action: ActionType,
    actor: &UserId,
    at: i64,
) -> Result<ActivityLogEntry, StoreError> {
    let row = sqlx::query_as::<_, ActivityRow>(
        r"
        INSERT INTO activity_log (ride_id, action_type, action_description, created_at)
        VALUES (?, ?, ?, ?)
        RETURNING *
        ",
    )
    .bind(ride.id.as_str())
    .bind(action.as_str())
    .bind(describe(ride, action, actor))
    .bind(at)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// Human-readable audit line for `action` on `ride`.
fn describe(ride: &RideRequest, action: ActionType, actor: &UserId) -> String {
    let route = format!("from {} to {}", ride.pickup_location, ride.destination);
    match action {
        ActionType::RideRequested => {
            let plural = if ride.passenger_count == 1 { "" } else { "s" };
            format!(
                "Ride requested {route} ({} passenger{plural})",
                ride.passenger_count
            )
        }
        ActionType::RideAccepted => format!("Driver {actor} accepted ride {route}"),
        ActionType::RideStarted => format!("Ride {route} started"),
        ActionType::RideCompleted => format!("Ride {route} completed"),
        ActionType::RideCancelled => format!("Ride {route} cancelled by {actor}"),
    }
}

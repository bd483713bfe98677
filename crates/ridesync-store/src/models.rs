//! Database rows and their conversion into validated domain types.

use ridesync_core::db::{StoreError, from_millis};
use ridesync_core::model::{ActivityLogEntry, RideRequest};

/// `ride_requests` row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RideRow {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub pickup_location: String,
    pub destination: String,
    pub passenger_count: i64,
    pub status: String,
    pub created_at: i64,
    pub accepted_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

/// `activity_log` row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActivityRow {
    pub id: i64,
    pub ride_id: String,
    pub action_type: String,
    pub action_description: String,
    pub created_at: i64,
}

/// `user_roles` row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoleRow {
    pub user_id: String,
    pub role: String,
    pub granted_at: i64,
}

fn timestamp(column: &str, ms: i64) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    from_millis(ms).ok_or_else(|| StoreError::Decode(format!("{column} out of range: {ms}")))
}

fn opt_timestamp(
    column: &str,
    ms: Option<i64>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, StoreError> {
    ms.map(|ms| timestamp(column, ms)).transpose()
}

impl TryFrom<RideRow> for RideRequest {
    type Error = StoreError;

    fn try_from(row: RideRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| StoreError::Decode(format!("ride {}: {e}", row.id)))?;
        let passenger_count = u32::try_from(row.passenger_count)
            .map_err(|_| StoreError::Decode(format!("ride {}: bad passenger count", row.id)))?;

        let ride = Self {
            status,
            passenger_count,
            created_at: timestamp("created_at", row.created_at)?,
            accepted_at: opt_timestamp("accepted_at", row.accepted_at)?,
            completed_at: opt_timestamp("completed_at", row.completed_at)?,
            updated_at: timestamp("updated_at", row.updated_at)?,
            rider_id: row.rider_id.into(),
            driver_id: row.driver_id.map(Into::into),
            pickup_location: row.pickup_location,
            destination: row.destination,
            id: row.id.into(),
        };
        if let Some(violation) = ride.invariant_violation() {
            return Err(StoreError::Decode(format!("ride {}: {violation}", ride.id)));
        }
        Ok(ride)
    }
}

impl TryFrom<ActivityRow> for ActivityLogEntry {
    type Error = StoreError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            action_type: row
                .action_type
                .parse()
                .map_err(|e| StoreError::Decode(format!("activity {}: {e}", row.id)))?,
            created_at: timestamp("created_at", row.created_at)?,
            ride_id: row.ride_id.into(),
            action_description: row.action_description,
        })
    }
}

/// Convert a batch of rows, failing on the first malformed one.
pub(crate) fn decode_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ridesync_core::model::{ActionType, RideStatus};

    use super::*;

    fn row(status: &str) -> RideRow {
        RideRow {
            id: "ride-1".into(),
            rider_id: "rider-1".into(),
            driver_id: None,
            pickup_location: "123 Main St".into(),
            destination: "456 Oak Ave".into(),
            passenger_count: 2,
            status: status.into(),
            created_at: 1_767_225_600_000,
            accepted_at: None,
            completed_at: None,
            updated_at: 1_767_225_600_000,
        }
    }

    #[test]
    fn valid_row_decodes() {
        let ride = RideRequest::try_from(row("requested")).unwrap();
        assert_eq!(ride.status, RideStatus::Requested);
        assert_eq!(ride.passenger_count, 2);
        assert_eq!(ride.id.as_str(), "ride-1");
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let err = RideRequest::try_from(row("teleported")).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn invariant_violation_is_a_decode_error() {
        let err = RideRequest::try_from(row("accepted")).unwrap_err();
        assert!(matches!(err, StoreError::Decode(msg) if msg.contains("driver")));
    }

    #[test]
    fn activity_row_decodes() {
        let entry = ActivityLogEntry::try_from(ActivityRow {
            id: 9,
            ride_id: "ride-1".into(),
            action_type: "ride_started".into(),
            action_description: "Ride started".into(),
            created_at: 1_767_225_600_000,
        })
        .unwrap();
        assert_eq!(entry.action_type, ActionType::RideStarted);
    }
}

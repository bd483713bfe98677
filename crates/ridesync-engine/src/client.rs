//! Bounded store calls and feed resubscription timing.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use ridesync_core::db::StoreError;
use ridesync_core::feed::{Keyed, Subscription};

use crate::error::{Operation, RideError};

/// Run a store call under `timeout`, attributing failures to `operation`.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    operation: Operation,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, RideError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(|e| RideError::store(operation, e)),
        Err(_) => {
            warn!(%operation, ?timeout, "Store call timed out");
            Err(RideError::store(operation, StoreError::Timeout(timeout)))
        }
    }
}

/// Pause between a feed closing (or failing to open) and the next attempt.
pub(crate) const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);

/// Deadline for the next subscribe attempt, if a feed is `wanted` and none
/// is held.
pub(crate) fn retry_at<T: Keyed>(
    wanted: bool,
    feed: Option<&Subscription<T>>,
) -> Option<Instant> {
    (wanted && feed.is_none()).then(|| Instant::now() + RESUBSCRIBE_DELAY)
}

/// Sleep until `deadline`; never completes without one.
pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

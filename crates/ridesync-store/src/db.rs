//! `SQLite` database for the ride, activity and role tables.

ridesync_core::define_database!(Database, "Store migrations complete");

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_create_tables() {
        let db = Database::open_in_memory().await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, ["activity_log", "ride_requests", "user_roles"]);
    }

    #[tokio::test]
    async fn file_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rides.db");
        let opts = ridesync_core::db::PoolOptions::default();

        let db = Database::open(&path, opts).await.unwrap();
        db.pool().close().await;
        let db = Database::open(&path, opts).await.unwrap();
        assert!(!db.pool().is_closed());
    }
}

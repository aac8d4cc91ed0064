//! Database migrations

use crate::error::{Error, Result};
use libsql::Connection;

const LATEST_VERSION: i32 = 1;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;
    if version > LATEST_VERSION {
        return Err(Error::Database(format!(
            "cache schema version {version} is newer than supported version {LATEST_VERSION}"
        )));
    }

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

/// Current schema version; 0 for a fresh database
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut tables = conn
        .query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            (),
        )
        .await?;
    if tables.next().await?.is_none() {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

/// Version 1: key/value cache table
///
/// Each entry holds the serialized JSON of one key; writes replace the
/// whole row.
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let tx = conn.transaction().await?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (1);",
    )
    .await?;
    tx.commit().await?;

    tracing::info!("Migrated cache database to version 1");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn memory_connection() -> (libsql::Database, Connection) {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        (db, conn)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migrations_are_idempotent() {
        let (_db, conn) = memory_connection().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();
        assert_eq!(get_version(&conn).await.unwrap(), LATEST_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_schema_is_rejected() {
        let (_db, conn) = memory_connection().await;
        run(&conn).await.unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (7)", ())
            .await
            .unwrap();

        let error = run(&conn).await.unwrap_err();
        assert!(matches!(error, Error::Database(_)));
    }
}

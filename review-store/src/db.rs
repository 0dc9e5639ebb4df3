//! Connection bootstrap: WAL pragmas, schema migration, version gate.

use std::path::Path;

use tokio_rusqlite::Connection;
use tracing::info;

use crate::errors::{StoreError, StoreResult};
use crate::schema::{SCHEMA_V1, SCHEMA_VERSION};

/// Opens (or creates) the database at `path` and brings it to the current
/// schema version.
///
/// # Errors
/// Fails if the file cannot be opened, pragmas cannot be applied, migration
/// DDL fails, or the stored schema version is newer than this build supports.
pub async fn open_db(path: &Path) -> StoreResult<Connection> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::Db(tokio_rusqlite::Error::Other(Box::new(e))))?;
    }

    let conn = Connection::open(path).await?;
    configure(&conn).await?;
    migrate(&conn).await?;
    Ok(conn)
}

/// In-memory database for tests; same pragmas and schema as on disk.
pub async fn open_in_memory() -> StoreResult<Connection> {
    let conn = Connection::open_in_memory().await?;
    configure(&conn).await?;
    migrate(&conn).await?;
    Ok(conn)
}

async fn configure(conn: &Connection) -> StoreResult<()> {
    conn.call(|db| {
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(std::time::Duration::from_secs(10))?;
        Ok::<_, tokio_rusqlite::Error>(())
    })
    .await?;
    Ok(())
}

async fn migrate(conn: &Connection) -> StoreResult<()> {
    let found = conn
        .call(|db| {
            let has_meta: bool = db.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_meta')",
                [],
                |row| row.get(0),
            )?;
            if !has_meta {
                return Ok(0i64);
            }
            let version: Option<i64> = db
                .query_row("SELECT version FROM schema_meta LIMIT 1", [], |row| {
                    row.get(0)
                })
                .ok();
            Ok::<_, tokio_rusqlite::Error>(version.unwrap_or(0))
        })
        .await?;

    if found > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    if found == SCHEMA_VERSION {
        return Ok(());
    }

    info!(from = found, to = SCHEMA_VERSION, "migrating database schema");
    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        if found < 1 {
            tx.execute_batch(SCHEMA_V1)?;
        }
        tx.execute("DELETE FROM schema_meta", [])?;
        tx.execute(
            "INSERT INTO schema_meta (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
        tx.commit()?;
        Ok::<_, tokio_rusqlite::Error>(())
    })
    .await?;
    Ok(())
}

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection};

use crate::error::AppError;
use crate::timestamps;

const MIGRATION_0001: (&str, &str) = (
    "0001_init.sql",
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0001_init.sql"
    )),
);

const MIGRATION_0002: (&str, &str) = (
    "0002_datasources.sql",
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0002_datasources.sql"
    )),
);

const MIGRATION_0003: (&str, &str) = (
    "0003_upstream_status.sql",
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0003_upstream_status.sql"
    )),
);

/// How long a writer waits on a locked database before failing. Per-datasource sync tasks
/// share the file through independent connections.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn migrations() -> Vec<(&'static str, &'static str)> {
    vec![MIGRATION_0001, MIGRATION_0002, MIGRATION_0003]
}

fn configure(conn: &Connection) -> Result<(), AppError> {
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| AppError::db("DB_OPEN_FAILED", "Failed to set busy timeout", e))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| AppError::db("DB_OPEN_FAILED", "Failed to enable foreign keys", e))?;
    Ok(())
}

pub fn open(path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path).map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to open SQLite database")
            .with_details(e.to_string())
    })?;
    // WAL lets the overview read path proceed while a sync run holds the write lock.
    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
        .map_err(|e| AppError::db("DB_OPEN_FAILED", "Failed to enable WAL journal", e))?;
    configure(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, AppError> {
    let conn = Connection::open_in_memory().map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to open in-memory SQLite database")
            .with_details(e.to_string())
    })?;
    configure(&conn)?;
    Ok(conn)
}

/// Open a database file and bring its schema up to date.
pub fn open_and_migrate(path: &Path) -> Result<Connection, AppError> {
    let mut conn = open(path)?;
    migrate(&mut conn)?;
    Ok(conn)
}

fn applied_migrations(conn: &Connection) -> Result<HashSet<String>, AppError> {
    let read_failed = |e| {
        AppError::db(
            "DB_MIGRATIONS_QUERY_FAILED",
            "Failed to read applied migrations",
            e,
        )
    };
    let mut stmt = conn
        .prepare("SELECT name FROM _migrations")
        .map_err(read_failed)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(read_failed)?
        .collect::<Result<HashSet<_>, _>>()
        .map_err(read_failed)?;
    Ok(names)
}

fn apply_migration(conn: &mut Connection, name: &str, sql: &str) -> Result<(), AppError> {
    let tx = conn.transaction().map_err(|e| {
        AppError::db("DB_TX_FAILED", "Failed to start migration transaction", e)
    })?;
    tx.execute_batch(sql).map_err(|e| {
        AppError::db("DB_MIGRATION_FAILED", format!("Migration {name} failed"), e)
    })?;
    tx.execute(
        "INSERT INTO _migrations(name, applied_at) VALUES (?1, ?2)",
        params![name, timestamps::now_utc()?],
    )
    .map_err(|e| {
        AppError::db("DB_MIGRATION_FAILED", format!("Failed to record {name}"), e)
    })?;
    tx.commit()
        .map_err(|e| AppError::db("DB_TX_FAILED", "Failed to commit migration", e))
}

/// Apply pending migrations in order; each is recorded once in `_migrations`.
pub fn migrate(conn: &mut Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
           name TEXT PRIMARY KEY NOT NULL,
           applied_at TEXT NOT NULL
         );",
    )
    .map_err(|e| {
        AppError::db(
            "DB_MIGRATIONS_TABLE_FAILED",
            "Failed to create migrations table",
            e,
        )
    })?;

    let applied = applied_migrations(conn)?;
    for (name, sql) in migrations() {
        if !applied.contains(name) {
            apply_migration(conn, name, sql)?;
            tracing::debug!(migration = name, "applied migration");
        }
    }
    Ok(())
}

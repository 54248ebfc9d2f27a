use super::StoreError;
use crate::config::StorageConfig;
use diesel::{
    connection::SimpleConnection,
    r2d2::{Builder, ConnectionManager, CustomizeConnection, Pool, PooledConnection},
    sqlite::SqliteConnection,
};
use std::time::Duration;

type DbConnection = ConnectionManager<SqliteConnection>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    id TEXT PRIMARY KEY NOT NULL,
    certificate BLOB NOT NULL,
    private_key BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    protocol TEXT NOT NULL,
    enrolled_at TEXT NOT NULL,
    enrolled_by TEXT NOT NULL,
    hardware_id TEXT,
    mac_addresses TEXT NOT NULL,
    windows_device_id TEXT NOT NULL,
    device_type TEXT,
    enrollment_type TEXT NOT NULL,
    os_edition TEXT,
    os_version TEXT,
    application_version TEXT,
    certificate_subject TEXT NOT NULL,
    certificate_hash TEXT NOT NULL,
    certificate_not_before TEXT NOT NULL,
    certificate_not_after TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    id TEXT PRIMARY KEY NOT NULL,
    document TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    email TEXT PRIMARY KEY NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Applied to every connection as the pool hands it out.
#[derive(Debug)]
struct ConnectionPragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct Database {
    internal_pool: Pool<DbConnection>,
}

// Simple axum extension permitting for pooling of SQLite3 connections.
impl Database {
    /// Opens the pool against the configured SQLite3 database,
    /// creating any missing tables.
    pub fn open(storage: &StorageConfig) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<SqliteConnection>::new(&storage.database_path);
        let mut builder = Builder::new()
            .max_size(storage.max_connections.max(1))
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(ConnectionPragmas));

        // Every connection to ":memory:" is its own database,
        // so it must never be recycled out from under us.
        if storage.database_path == ":memory:" {
            builder = builder.max_size(1).idle_timeout(None).max_lifetime(None);
        }

        let database = Database {
            internal_pool: builder.build(manager)?,
        };
        database.connection()?.batch_execute(SCHEMA)?;

        Ok(database)
    }

    /// Begins a new connection.
    /// There's no need to worry about manually closing
    /// and returning to the pool, as this will occur automatically.
    pub fn connection(&self) -> Result<PooledConnection<DbConnection>, StoreError> {
        Ok(self.internal_pool.get()?)
    }
}

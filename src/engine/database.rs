//! OtaDeploy Database Module
//! SQLite release metadata store with connection pooling

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use thiserror::Error;

use crate::engine::release::{FirmwareRelease, NewRelease};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create database pool: {0}")]
    PoolError(#[from] r2d2::Error),
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Firmware version {0} already exists")]
    DuplicateVersion(String),
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),
}

/// Durable release history.
///
/// `insert_release` must reject a version that is already recorded with
/// [`DatabaseError::DuplicateVersion`]; concurrent deployers rely on it as the
/// final arbiter.
pub trait MetadataStore: Send + Sync {
    /// Version of the most recently recorded release
    fn latest_version(&self) -> Result<Option<String>, DatabaseError>;

    fn version_exists(&self, version: &str) -> Result<bool, DatabaseError>;

    fn insert_release(&self, release: &NewRelease) -> Result<FirmwareRelease, DatabaseError>;

    /// Most recent first
    fn list_releases(&self, limit: usize) -> Result<Vec<FirmwareRelease>, DatabaseError>;
}

#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;
        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.pool.get()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS firmware_releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                firmware_version TEXT NOT NULL UNIQUE,
                firmware_path TEXT NOT NULL,
                signature_path TEXT NOT NULL,
                changelog TEXT NOT NULL,
                deployed_by TEXT NOT NULL,
                checksum TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // PRAGMA journal_mode returns the resulting mode as a row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Ok(())
    }

    pub fn get_connection(&self) -> Result<DbConnection, DatabaseError> {
        Ok(self.pool.get()?)
    }
}

const RELEASE_COLUMNS: &str =
    "firmware_version, firmware_path, signature_path, changelog, deployed_by, checksum, created_at";

fn release_from_row(row: &Row<'_>) -> rusqlite::Result<FirmwareRelease> {
    let created_at: String = row.get(6)?;
    let created_at = created_at.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(FirmwareRelease {
        version: row.get(0)?,
        firmware_blob_ref: row.get(1)?,
        signature_blob_ref: row.get(2)?,
        changelog: row.get(3)?,
        deployed_by: row.get(4)?,
        checksum: row.get(5)?,
        created_at,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl MetadataStore for Database {
    fn latest_version(&self) -> Result<Option<String>, DatabaseError> {
        let conn = self.get_connection()?;
        let version = conn
            .query_row(
                "SELECT firmware_version FROM firmware_releases ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    fn version_exists(&self, version: &str) -> Result<bool, DatabaseError> {
        let conn = self.get_connection()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM firmware_releases WHERE firmware_version = ?1",
                [version],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_release(&self, release: &NewRelease) -> Result<FirmwareRelease, DatabaseError> {
        let conn = self.get_connection()?;
        let query = format!(
            "INSERT INTO firmware_releases ({RELEASE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             RETURNING {RELEASE_COLUMNS}"
        );

        conn.query_row(
            &query,
            params![
                release.version,
                release.firmware_blob_ref,
                release.signature_blob_ref,
                release.changelog,
                release.deployed_by,
                release.checksum,
            ],
            release_from_row,
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                DatabaseError::DuplicateVersion(release.version.clone())
            } else {
                DatabaseError::SqliteError(e)
            }
        })
    }

    fn list_releases(&self, limit: usize) -> Result<Vec<FirmwareRelease>, DatabaseError> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RELEASE_COLUMNS} FROM firmware_releases ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let releases = stmt
            .query_map([limit as i64], release_from_row)?
            .collect::<Result<Vec<FirmwareRelease>, _>>()?;
        Ok(releases)
    }
}

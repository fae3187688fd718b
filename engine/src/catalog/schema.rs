//! SQLite schema and migrations for the catalog.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::Result;

pub const SCHEMA_VERSION: i32 = 1;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Bring the catalog up to `SCHEMA_VERSION`, applying any pending
/// migrations in order. Safe to call on every open.
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    info!(current_version, "catalog schema check");

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        debug!(version, "applying catalog migration");
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => panic!("unknown catalog migration version: {version}"),
    }
}

/// Initial schema: jobs, files, versions.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE jobs (
            name TEXT PRIMARY KEY,
            src_dir TEXT NOT NULL,
            mid_dir TEXT NOT NULL,
            dst_dir TEXT NOT NULL,
            reserved_bytes INTEGER NOT NULL,
            sync_deletions INTEGER NOT NULL,
            hostname TEXT NOT NULL,
            prune_age_days REAL NOT NULL
        );

        CREATE TABLE files (
            job TEXT NOT NULL REFERENCES jobs(name) ON DELETE CASCADE,
            rel_path TEXT NOT NULL,
            size INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            modtime REAL NOT NULL,
            progress INTEGER NOT NULL,
            PRIMARY KEY (job, rel_path)
        );

        CREATE INDEX idx_files_job_progress ON files(job, progress);

        CREATE TABLE versions (
            version_path TEXT PRIMARY KEY,
            job TEXT NOT NULL REFERENCES jobs(name) ON DELETE CASCADE,
            rel_path TEXT NOT NULL,
            size INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            modtime REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'success'
        );

        CREATE INDEX idx_versions_job_modtime ON versions(job, modtime);
        ",
    )?;

    Ok(())
}

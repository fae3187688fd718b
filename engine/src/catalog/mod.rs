//! Persistent catalog: the single source of truth for resume.
//!
//! `Catalog` owns a single `rusqlite::Connection` and commits every
//! mutation before returning, so that a crash between two catalog writes
//! never leaves a partially-applied update visible to the next run.

mod schema;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::Span;

use crate::error::{Error, Result};
use crate::model::{FileFilter, FileRecord, Job, JobEdit, Progress, VersionRecord};

pub struct Catalog {
    conn: Connection,
    span: Span,
}

impl Catalog {
    /// Open (creating if absent) the catalog database at `path`, migrating
    /// it to the current schema version.
    pub fn open(path: &std::path::Path, span: Span) -> Result<Self> {
        let _guard = span.enter();
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        schema::migrate(&conn)?;
        drop(_guard);
        Ok(Self { conn, span })
    }

    /// Open an in-memory catalog. Used by tests and by one-shot tools that
    /// don't need a catalog to outlive the process.
    pub fn open_in_memory(span: Span) -> Result<Self> {
        let _guard = span.enter();
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        drop(_guard);
        Ok(Self { conn, span })
    }

    fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    // ---- jobs ----------------------------------------------------------

    pub fn get_job(&self, name: &str) -> Result<Job> {
        let _guard = self.enter();
        self.conn
            .query_row(
                "SELECT name, src_dir, mid_dir, dst_dir, reserved_bytes, sync_deletions, hostname, prune_age_days
                 FROM jobs WHERE name = ?1",
                [name],
                job_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::JobNotFound {
                name: name.to_string(),
            })
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let _guard = self.enter();
        let mut stmt = self.conn.prepare(
            "SELECT name, src_dir, mid_dir, dst_dir, reserved_bytes, sync_deletions, hostname, prune_age_days
             FROM jobs ORDER BY name",
        )?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Insert `job` if its name is unused. No-op (not an error) if a job
    /// with that name already exists.
    pub fn upsert_job(&self, job: &Job) -> Result<()> {
        let _guard = self.enter();
        self.conn.execute(
            "INSERT INTO jobs (name, src_dir, mid_dir, dst_dir, reserved_bytes, sync_deletions, hostname, prune_age_days)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(name) DO NOTHING",
            params![
                job.name,
                job.src_dir,
                job.mid_dir,
                job.dst_dir,
                job.reserved_bytes as i64,
                job.sync_deletions,
                job.hostname,
                job.prune_age_days,
            ],
        )?;
        Ok(())
    }

    pub fn edit_job(&self, name: &str, edit: &JobEdit) -> Result<()> {
        let _guard = self.enter();
        self.apply_edit("name = ?1", &[name], edit)
    }

    pub fn edit_all_jobs(&self, edit: &JobEdit) -> Result<()> {
        let _guard = self.enter();
        self.apply_edit("1 = 1", &[], edit)
    }

    fn apply_edit(&self, where_clause: &str, where_params: &[&str], edit: &JobEdit) -> Result<()> {
        if edit.is_empty() {
            return Ok(());
        }
        let mut sets = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(mid_dir) = &edit.mid_dir {
            sets.push("mid_dir = ?".to_string());
            values.push(Box::new(mid_dir.clone()));
        }
        if let Some(reserved_bytes) = edit.reserved_bytes {
            sets.push("reserved_bytes = ?".to_string());
            values.push(Box::new(reserved_bytes as i64));
        }
        if let Some(sync_deletions) = edit.sync_deletions {
            sets.push("sync_deletions = ?".to_string());
            values.push(Box::new(sync_deletions));
        }
        if let Some(prune_age_days) = edit.prune_age_days {
            sets.push("prune_age_days = ?".to_string());
            values.push(Box::new(prune_age_days));
        }

        let sql = format!("UPDATE jobs SET {} WHERE {}", sets.join(", "), where_clause);
        for p in where_params {
            values.push(Box::new(p.to_string()));
        }
        let value_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        self.conn.execute(&sql, value_refs.as_slice())?;
        Ok(())
    }

    // ---- files -----------------------------------------------------------

    pub fn get_file(&self, job: &str, rel_path: &str) -> Result<Option<FileRecord>> {
        let _guard = self.enter();
        self.conn
            .query_row(
                "SELECT job, rel_path, size, checksum, modtime, progress
                 FROM files WHERE job = ?1 AND rel_path = ?2",
                params![job, rel_path],
                file_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    /// Insert `record` if its key is unused; no-op otherwise.
    pub fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        let _guard = self.enter();
        self.conn.execute(
            "INSERT INTO files (job, rel_path, size, checksum, modtime, progress)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(job, rel_path) DO NOTHING",
            params![
                record.job,
                record.rel_path,
                record.size as i64,
                record.checksum,
                record.modtime,
                record.progress,
            ],
        )?;
        Ok(())
    }

    pub fn set_progress(&self, job: &str, rel_path: &str, progress: Progress) -> Result<()> {
        let _guard = self.enter();
        self.conn.execute(
            "UPDATE files SET progress = ?1 WHERE job = ?2 AND rel_path = ?3",
            params![progress, job, rel_path],
        )?;
        Ok(())
    }

    /// Refresh size/checksum/modtime for an existing row and reset its
    /// progress to `AtSource`.
    pub fn update_attrs(
        &self,
        job: &str,
        rel_path: &str,
        size: u64,
        checksum: &str,
        modtime: f64,
    ) -> Result<()> {
        let _guard = self.enter();
        self.conn.execute(
            "UPDATE files SET size = ?1, checksum = ?2, modtime = ?3, progress = ?4
             WHERE job = ?5 AND rel_path = ?6",
            params![
                size as i64,
                checksum,
                modtime,
                Progress::AtSource,
                job,
                rel_path
            ],
        )?;
        Ok(())
    }

    pub fn delete_file(&self, job: &str, rel_path: &str) -> Result<()> {
        let _guard = self.enter();
        self.conn.execute(
            "DELETE FROM files WHERE job = ?1 AND rel_path = ?2",
            params![job, rel_path],
        )?;
        Ok(())
    }

    pub fn list_files(&self, job: &str, filter: FileFilter) -> Result<Vec<FileRecord>> {
        let _guard = self.enter();
        let base = "SELECT job, rel_path, size, checksum, modtime, progress FROM files WHERE job = ?1";
        let sql = match filter {
            FileFilter::All => format!("{base} ORDER BY rel_path"),
            FileFilter::NotYetAtDestination => {
                format!("{base} AND progress < 2 ORDER BY rel_path")
            }
            FileFilter::AtDestination => format!("{base} AND progress = 2 ORDER BY rel_path"),
            FileFilter::AtStaging => format!("{base} AND progress = 1 ORDER BY rel_path"),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([job], file_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ---- versions ----------------------------------------------------------

    pub fn add_version(&self, version: &VersionRecord) -> Result<()> {
        let _guard = self.enter();
        self.conn.execute(
            "INSERT INTO versions (version_path, job, rel_path, size, checksum, modtime, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                version.version_path,
                version.job,
                version.rel_path,
                version.size as i64,
                version.checksum,
                version.modtime,
                version.status,
            ],
        )?;
        Ok(())
    }

    pub fn list_versions(&self, job: &str, older_than_modtime: f64) -> Result<Vec<VersionRecord>> {
        let _guard = self.enter();
        let mut stmt = self.conn.prepare(
            "SELECT version_path, job, rel_path, size, checksum, modtime, status FROM versions
             WHERE job = ?1 AND modtime < ?2 ORDER BY modtime",
        )?;
        let versions = stmt
            .query_map(params![job, older_than_modtime], version_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    pub fn delete_version(&self, version_path: &str) -> Result<()> {
        let _guard = self.enter();
        self.conn
            .execute("DELETE FROM versions WHERE version_path = ?1", [version_path])?;
        Ok(())
    }

    pub fn mark_version_success(&self, version_path: &str) -> Result<()> {
        let _guard = self.enter();
        self.conn.execute(
            "UPDATE versions SET status = ?1 WHERE version_path = ?2",
            params![crate::model::VersionStatus::Success, version_path],
        )?;
        Ok(())
    }

    /// Delete any `Pending`-status versions of `(job, rel_path)` whose
    /// checksum doesn't match `keep_checksum`, i.e. versions left behind by
    /// an archive attempt that never reached `Success`. Called before a new
    /// pending version is created for the same live file.
    pub fn purge_pending_versions(&self, job: &str, rel_path: &str, keep_checksum: &str) -> Result<()> {
        let _guard = self.enter();
        self.conn.execute(
            "DELETE FROM versions
             WHERE job = ?1 AND rel_path = ?2 AND status = ?3 AND checksum != ?4",
            params![job, rel_path, crate::model::VersionStatus::Pending, keep_checksum],
        )?;
        Ok(())
    }
}

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    let reserved_bytes: i64 = row.get(4)?;
    Ok(Job {
        name: row.get(0)?,
        src_dir: row.get(1)?,
        mid_dir: row.get(2)?,
        dst_dir: row.get(3)?,
        reserved_bytes: reserved_bytes as u64,
        sync_deletions: row.get(5)?,
        hostname: row.get(6)?,
        prune_age_days: row.get(7)?,
    })
}

fn file_from_row(row: &Row) -> rusqlite::Result<FileRecord> {
    let size: i64 = row.get(2)?;
    Ok(FileRecord {
        job: row.get(0)?,
        rel_path: row.get(1)?,
        size: size as u64,
        checksum: row.get(3)?,
        modtime: row.get(4)?,
        progress: row.get(5)?,
    })
}

fn version_from_row(row: &Row) -> rusqlite::Result<VersionRecord> {
    let size: i64 = row.get(3)?;
    Ok(VersionRecord {
        version_path: row.get(0)?,
        job: row.get(1)?,
        rel_path: row.get(2)?,
        size: size as u64,
        checksum: row.get(4)?,
        modtime: row.get(5)?,
        status: row.get(6)?,
    })
}

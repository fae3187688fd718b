//! Core data structures: `Job`, `FileRecord`, `VersionRecord`, and the
//! `Progress` they carry.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Per-file replication state. Stored in the catalog as the integers
/// `{-1, 0, 1, 2}`, never surfaced to callers as bare numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Progress {
    MarkedForRemoval,
    AtSource,
    AtStaging,
    AtDestination,
}

impl Progress {
    fn code(self) -> i64 {
        match self {
            Progress::MarkedForRemoval => -1,
            Progress::AtSource => 0,
            Progress::AtStaging => 1,
            Progress::AtDestination => 2,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(Progress::MarkedForRemoval),
            0 => Some(Progress::AtSource),
            1 => Some(Progress::AtStaging),
            2 => Some(Progress::AtDestination),
            _ => None,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Progress::MarkedForRemoval => "marked-for-removal",
            Progress::AtSource => "at-source",
            Progress::AtStaging => "at-staging",
            Progress::AtDestination => "at-destination",
        };
        write!(f, "{s}")
    }
}

impl ToSql for Progress {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for Progress {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        Progress::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

/// A named replication unit with source/staging/destination roots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub src_dir: String,
    pub mid_dir: String,
    pub dst_dir: String,
    pub reserved_bytes: u64,
    pub sync_deletions: bool,
    pub hostname: String,
    pub prune_age_days: f64,
}

/// Partial update for an existing job. `None` fields are left unchanged.
/// Root directories and `hostname` are intentionally not editable: a job
/// that has already staged files under its original roots would be
/// silently orphaned by retargeting them after the fact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobEdit {
    pub mid_dir: Option<String>,
    pub reserved_bytes: Option<u64>,
    pub sync_deletions: Option<bool>,
    pub prune_age_days: Option<f64>,
}

impl JobEdit {
    pub fn is_empty(&self) -> bool {
        self.mid_dir.is_none()
            && self.reserved_bytes.is_none()
            && self.sync_deletions.is_none()
            && self.prune_age_days.is_none()
    }
}

/// Catalog row for one source-relative path within one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub job: String,
    pub rel_path: String,
    pub size: u64,
    pub checksum: String,
    pub modtime: f64,
    pub progress: Progress,
}

/// Status of a `VersionRecord`. This design's archive step is synchronous
/// (the file is renamed into `.archive/` before the row is ever inserted),
/// so every version this crate creates starts at `Success`; `Pending`
/// exists for the catalog contract's `purge_pending_versions` operation,
/// which a future asynchronous archive path could use to clean up after
/// itself (see DESIGN.md's Open Question resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionStatus {
    Pending,
    Success,
}

impl VersionStatus {
    fn as_str(self) -> &'static str {
        match self {
            VersionStatus::Pending => "pending",
            VersionStatus::Success => "success",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VersionStatus::Pending),
            "success" => Some(VersionStatus::Success),
            _ => None,
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ToSql for VersionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for VersionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = String::column_result(value)?;
        VersionStatus::from_str(&s).ok_or(FromSqlError::InvalidType)
    }
}

/// Catalog row tracking one archived prior-destination file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_path: String,
    pub job: String,
    pub rel_path: String,
    pub size: u64,
    pub checksum: String,
    pub modtime: f64,
    pub status: VersionStatus,
}

/// Filter applied by `Catalog::list_files`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFilter {
    All,
    NotYetAtDestination,
    AtDestination,
    AtStaging,
}

/// Maximum difference between two modtimes still considered "equal".
/// Floating-point modtimes recovered from different filesystem layers
/// (source stat vs. catalog REAL column) are never compared for exact
/// equality.
pub const MODTIME_EPSILON_SECS: f64 = 0.001;

pub fn modtime_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= MODTIME_EPSILON_SECS
}

pub fn modtime_gt(a: f64, b: f64) -> bool {
    a - b > MODTIME_EPSILON_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_round_trips_through_sql_codes() {
        for p in [
            Progress::MarkedForRemoval,
            Progress::AtSource,
            Progress::AtStaging,
            Progress::AtDestination,
        ] {
            assert_eq!(Progress::from_code(p.code()), Some(p));
        }
    }

    #[test]
    fn modtime_epsilon_tolerates_jitter() {
        assert!(modtime_eq(100.0, 100.0005));
        assert!(!modtime_eq(100.0, 100.01));
        assert!(modtime_gt(100.01, 100.0));
        assert!(!modtime_gt(100.0005, 100.0));
    }

    #[test]
    fn version_status_round_trips_through_sql_strings() {
        for s in [VersionStatus::Pending, VersionStatus::Success] {
            assert_eq!(VersionStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(VersionStatus::from_str("bogus"), None);
    }
}

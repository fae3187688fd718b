//! Typed configuration surface for initializing and editing jobs.
//!
//! This module owns no file I/O: the `cli` crate reads TOML/arguments and
//! builds a `JobOptions`/`JobEditOptions` value to hand to `engine`. Keeping
//! parsing out of the engine mirrors the spec's "configuration entry points
//! are an external collaborator" framing.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Job, JobEdit};
use crate::path_norm;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const DEFAULT_MID_DIR: &str = "cargo";

/// Options accepted by the `init` operation. `reserved_gib` is expressed in
/// gibibytes and multiplied out to bytes when building the `Job` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    pub job_name: String,
    pub src_dir: String,
    pub dst_dir: String,
    #[serde(default = "default_mid_dir")]
    pub mid_dir: String,
    #[serde(default)]
    pub reserved_gib: f64,
    #[serde(default)]
    pub sync_deletions: bool,
    #[serde(default = "default_prune_age_days")]
    pub prune_age_days: f64,
    #[serde(default)]
    pub hostname: Option<String>,
}

fn default_mid_dir() -> String {
    DEFAULT_MID_DIR.to_string()
}

fn default_prune_age_days() -> f64 {
    30.0
}

impl JobOptions {
    /// Validate and normalize these options into a `Job` row. `src_dir` and
    /// `dst_dir` must be absolute; both are canonicalized to forward-slash
    /// form before storage.
    pub fn into_job(self, local_hostname: impl FnOnce() -> String) -> Result<Job> {
        if !path_norm::is_absolute(&self.src_dir) {
            return Err(Error::NotAbsolute { path: self.src_dir });
        }
        if !path_norm::is_absolute(&self.dst_dir) {
            return Err(Error::NotAbsolute { path: self.dst_dir });
        }

        Ok(Job {
            name: self.job_name,
            src_dir: path_norm::normalize(&self.src_dir),
            mid_dir: path_norm::normalize(&self.mid_dir),
            dst_dir: path_norm::normalize(&self.dst_dir),
            reserved_bytes: (self.reserved_gib * GIB).round() as u64,
            sync_deletions: self.sync_deletions,
            hostname: self.hostname.unwrap_or_else(local_hostname),
            prune_age_days: self.prune_age_days,
        })
    }
}

/// Options accepted by the `edit` operation. Unset fields leave the stored
/// job attribute unchanged; root directories and hostname are not editable
/// (see DESIGN.md's Open Question resolution).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobEditOptions {
    #[serde(default)]
    pub mid_dir: Option<String>,
    #[serde(default)]
    pub reserved_gib: Option<f64>,
    #[serde(default)]
    pub sync_deletions: Option<bool>,
    #[serde(default)]
    pub prune_age_days: Option<f64>,
}

impl From<JobEditOptions> for JobEdit {
    fn from(opts: JobEditOptions) -> Self {
        JobEdit {
            mid_dir: opts.mid_dir.map(|m| path_norm::normalize(&m)),
            reserved_bytes: opts.reserved_gib.map(|gib| (gib * GIB).round() as u64),
            sync_deletions: opts.sync_deletions,
            prune_age_days: opts.prune_age_days,
        }
    }
}

/// A batch file of `[[job]]` tables, each parsed as `JobOptions`. Consumed
/// by the `cli` crate's `batch` subcommand to initialize and run several
/// jobs from one TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(rename = "job", default)]
    pub jobs: Vec<JobOptions>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_gib_converts_to_bytes() {
        let opts = JobOptions {
            job_name: "nightly".to_string(),
            src_dir: "/src".to_string(),
            dst_dir: "/dst".to_string(),
            mid_dir: default_mid_dir(),
            reserved_gib: 1.0,
            sync_deletions: false,
            prune_age_days: default_prune_age_days(),
            hostname: Some("host-a".to_string()),
        };
        let job = opts.into_job(|| "fallback".to_string()).unwrap();
        assert_eq!(job.reserved_bytes, 1024 * 1024 * 1024);
        assert_eq!(job.hostname, "host-a");
    }

    #[test]
    fn relative_src_dir_is_rejected() {
        let opts = JobOptions {
            job_name: "nightly".to_string(),
            src_dir: "relative/src".to_string(),
            dst_dir: "/dst".to_string(),
            mid_dir: default_mid_dir(),
            reserved_gib: 0.0,
            sync_deletions: false,
            prune_age_days: default_prune_age_days(),
            hostname: None,
        };
        assert!(matches!(
            opts.into_job(|| "fallback".to_string()),
            Err(Error::NotAbsolute { .. })
        ));
    }

    #[test]
    fn missing_hostname_falls_back_to_local() {
        let opts = JobOptions {
            job_name: "nightly".to_string(),
            src_dir: "/src".to_string(),
            dst_dir: "/dst".to_string(),
            mid_dir: default_mid_dir(),
            reserved_gib: 0.0,
            sync_deletions: false,
            prune_age_days: default_prune_age_days(),
            hostname: None,
        };
        let job = opts.into_job(|| "fallback-host".to_string()).unwrap();
        assert_eq!(job.hostname, "fallback-host");
    }

    #[test]
    fn batch_config_parses_multiple_jobs() {
        let toml = r#"
            [[job]]
            job_name = "nightly"
            src_dir = "/src/a"
            dst_dir = "/dst/a"

            [[job]]
            job_name = "weekly"
            src_dir = "/src/b"
            dst_dir = "/dst/b"
            reserved_gib = 2.0
        "#;
        let cfg: BatchConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.jobs.len(), 2);
        assert_eq!(cfg.jobs[1].reserved_gib, 2.0);
    }
}

//! Orchestrates a job end-to-end: scan source, reconcile deletions, drive
//! each file's `FileAgent` through its next hop, then prune.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tracing::{info, warn, Span};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::file_agent::FileAgent;
use crate::model::{modtime_gt, FileFilter, Job};
use crate::path_norm;
use crate::progress::ProgressCallback;

pub struct JobRunner<'a> {
    catalog: &'a Catalog,
    span: Span,
}

impl<'a> JobRunner<'a> {
    pub fn new(catalog: &'a Catalog, span: Span) -> Self {
        Self { catalog, span }
    }

    fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// Run `job_name` to completion: scan, reconcile, iterate files,
    /// prune. `same_system` forces destination-directory creation even
    /// when this host is not the job's recorded source host.
    pub fn start_job(
        &self,
        job_name: &str,
        same_system: bool,
        progress_cb: &dyn ProgressCallback,
    ) -> Result<()> {
        let _guard = self.enter();
        let job = self.catalog.get_job(job_name)?;
        progress_cb.on_job_started(&job);

        let hostname = local_hostname();
        let on_source_host = hostname == job.hostname;

        if same_system || !on_source_host {
            let dst_root = Path::new(&job.dst_dir).join(&job.name);
            fs::create_dir_all(&dst_root).map_err(|e| Error::io(&dst_root, e))?;
        }

        if on_source_host {
            let mid_root = Path::new(&job.mid_dir).join(&job.name);
            fs::create_dir_all(&mid_root).map_err(|e| Error::io(&mid_root, e))?;
            self.scan_source(&job)?;
            self.scan_deleted(&job)?;
        }

        let mut out_of_space = false;
        for record in self.catalog.list_files(&job.name, FileFilter::NotYetAtDestination)? {
            if out_of_space {
                break;
            }
            match self.drive_one_file(&job, &record, progress_cb) {
                Ok(true) => {
                    warn!(job = %job.name, "stopping job: out of space");
                    out_of_space = true;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(job = %job.name, rel_path = %record.rel_path, error = %err, "skipping file after error");
                }
            }
        }

        self.prune_job(&job)?;
        progress_cb.on_job_completed(&job);

        if out_of_space {
            return Err(Error::OutOfSpace {
                path: Path::new(&job.mid_dir).to_path_buf(),
                need: 0,
                have: 0,
            });
        }
        Ok(())
    }

    /// Drive one file's next hop. Returns `Ok(true)` if this file's target
    /// filesystem is out of space (the caller stops issuing further copies
    /// for the job), `Ok(false)` otherwise.
    fn drive_one_file(&self, job: &Job, record: &crate::model::FileRecord, progress_cb: &dyn ProgressCallback) -> Result<bool> {
        let agent = FileAgent::new(self.catalog, job.clone(), record.rel_path.clone(), self.span.clone())?;
        agent.verify_staging()?;
        if job.sync_deletions {
            agent.sync_deletions(false)?;
        }
        if !agent.has_free_space()? {
            return Ok(true);
        }
        progress_cb.on_file_hop_started(job, record);
        let new_progress = agent.next_hop()?;
        progress_cb.on_file_hop_completed(job, &record.rel_path, new_progress);
        Ok(false)
    }

    /// Walk `src_dir` and ensure every regular file has a catalog row,
    /// refreshing attributes (and resetting progress) for any file whose
    /// disk modtime has moved past what's recorded.
    pub(crate) fn scan_source(&self, job: &Job) -> Result<()> {
        let _guard = self.enter();
        info!(job = %job.name, "scanning source tree");
        for entry in WalkDir::new(&job.src_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&job.src_dir)
                .unwrap_or(entry.path());
            let rel_path = path_norm::normalize_path(rel);
            if rel_path.is_empty() {
                continue;
            }

            let result: Result<()> = (|| {
                let agent = FileAgent::new(self.catalog, job.clone(), rel_path.clone(), self.span.clone())?;
                if let Some(existing) = self.catalog.get_file(&job.name, &rel_path)? {
                    let disk_modtime = entry
                        .metadata()
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                        .map(|d| d.as_secs_f64())
                        .unwrap_or(existing.modtime);
                    if modtime_gt(disk_modtime, existing.modtime) {
                        agent.update_attrs()?;
                    }
                }
                Ok(())
            })();
            if let Err(err) = result {
                warn!(job = %job.name, rel_path = %rel_path, error = %err, "skipping file during scan");
            }
        }
        Ok(())
    }

    /// Mark every catalog row whose source path no longer exists on disk.
    fn scan_deleted(&self, job: &Job) -> Result<()> {
        let _guard = self.enter();
        for record in self.catalog.list_files(&job.name, FileFilter::All)? {
            let src_path = Path::new(&job.src_dir).join(&record.rel_path);
            if !src_path.exists() {
                info!(rel_path = %record.rel_path, "source vanished, marking for removal");
                let agent = FileAgent::new(self.catalog, job.clone(), record.rel_path.clone(), self.span.clone())?;
                agent.mark_for_removal()?;
            }
        }
        Ok(())
    }

    fn prune_job(&self, job: &Job) -> Result<()> {
        let _guard = self.enter();
        for record in self.catalog.list_files(&job.name, FileFilter::All)? {
            let agent = FileAgent::new(self.catalog, job.clone(), record.rel_path.clone(), self.span.clone())?;
            agent.prune_versions(job.prune_age_days)?;
        }
        Ok(())
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use std::fs;

    fn setup_job(dir: &tempfile::TempDir) -> Job {
        let src = dir.path().join("src");
        let mid = dir.path().join("mid");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();

        Job {
            name: "nightly".to_string(),
            src_dir: src.to_string_lossy().to_string(),
            mid_dir: mid.to_string_lossy().to_string(),
            dst_dir: dst.to_string_lossy().to_string(),
            reserved_bytes: 0,
            sync_deletions: true,
            hostname: local_hostname(),
            prune_age_days: 30.0,
        }
    }

    #[test]
    fn start_job_copies_new_files_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let job = setup_job(&dir);
        fs::write(Path::new(&job.src_dir).join("a.txt"), b"hello").unwrap();
        fs::create_dir_all(Path::new(&job.src_dir).join("sub")).unwrap();
        fs::write(Path::new(&job.src_dir).join("sub/b.txt"), b"world").unwrap();

        let catalog = Catalog::open_in_memory(Span::none()).unwrap();
        catalog.upsert_job(&job).unwrap();
        let runner = JobRunner::new(&catalog, Span::none());

        runner.start_job(&job.name, false, &NullProgress).unwrap();
        runner.start_job(&job.name, false, &NullProgress).unwrap();

        assert!(Path::new(&job.dst_dir).join(&job.name).join("a.txt").exists());
        assert!(Path::new(&job.dst_dir)
            .join(&job.name)
            .join("sub/b.txt")
            .exists());
        let files = catalog.list_files(&job.name, FileFilter::AtDestination).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn scan_deleted_marks_rows_whose_source_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let job = setup_job(&dir);
        let a_path = Path::new(&job.src_dir).join("a.txt");
        fs::write(&a_path, b"hello").unwrap();

        let catalog = Catalog::open_in_memory(Span::none()).unwrap();
        catalog.upsert_job(&job).unwrap();
        let runner = JobRunner::new(&catalog, Span::none());
        runner.start_job(&job.name, false, &NullProgress).unwrap();

        fs::remove_file(&a_path).unwrap();
        runner.start_job(&job.name, false, &NullProgress).unwrap();

        let record = catalog.get_file(&job.name, "a.txt").unwrap().unwrap();
        assert_eq!(record.progress, crate::model::Progress::MarkedForRemoval);
    }

    #[test]
    fn source_modification_archives_prior_destination_content() {
        let dir = tempfile::tempdir().unwrap();
        let job = setup_job(&dir);
        let a_path = Path::new(&job.src_dir).join("a.txt");
        fs::write(&a_path, b"hi").unwrap();

        let catalog = Catalog::open_in_memory(Span::none()).unwrap();
        catalog.upsert_job(&job).unwrap();
        let runner = JobRunner::new(&catalog, Span::none());
        // Two passes: AtSource -> AtStaging, then AtStaging -> AtDestination.
        runner.start_job(&job.name, false, &NullProgress).unwrap();
        runner.start_job(&job.name, false, &NullProgress).unwrap();

        let old_digest = crate::digest::digest_file(&a_path).unwrap();

        let newer = filetime::FileTime::from_system_time(SystemTime::now() + std::time::Duration::from_secs(5));
        fs::write(&a_path, b"bye").unwrap();
        filetime::set_file_mtime(&a_path, newer).unwrap();

        // Two more passes to push the refreshed record back through to
        // destination, where the stale content gets archived.
        runner.start_job(&job.name, false, &NullProgress).unwrap();
        runner.start_job(&job.name, false, &NullProgress).unwrap();

        let dst_path = Path::new(&job.dst_dir).join(&job.name).join("a.txt");
        assert_eq!(fs::read(&dst_path).unwrap(), b"bye");

        let new_digest = crate::digest::digest_file(&dst_path).unwrap();
        assert_ne!(old_digest, new_digest);

        let versions = catalog.list_versions(&job.name, f64::MAX).unwrap();
        assert_eq!(versions.len(), 1);
        let archived = fs::read(&versions[0].version_path).unwrap();
        assert_eq!(archived, b"hi");
        assert_eq!(versions[0].checksum, old_digest);
        assert_eq!(versions[0].status, crate::model::VersionStatus::Success);
        assert_ne!(versions[0].checksum, new_digest);
    }

    #[test]
    fn insufficient_reserved_space_stops_the_job_without_copying() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = setup_job(&dir);
        fs::write(Path::new(&job.src_dir).join("a.txt"), b"hello").unwrap();
        // No real filesystem exposes petabytes of free space; this guarantees
        // admission always fails without depending on actual disk usage.
        job.reserved_bytes = u64::MAX;

        let catalog = Catalog::open_in_memory(Span::none()).unwrap();
        catalog.upsert_job(&job).unwrap();
        let runner = JobRunner::new(&catalog, Span::none());

        let result = runner.start_job(&job.name, false, &NullProgress);
        assert!(matches!(result, Err(Error::OutOfSpace { .. })));

        assert!(!Path::new(&job.mid_dir).join(&job.name).join("a.txt").exists());
        let record = catalog.get_file(&job.name, "a.txt").unwrap().unwrap();
        assert_eq!(record.progress, crate::model::Progress::AtSource);
    }
}

//! Per-file state machine: admission, promotion, verification, archiving,
//! pruning, and deletion-sync for a single `(job, rel_path)`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn, Span};

use crate::catalog::Catalog;
use crate::digest::digest_file;
use crate::error::{Error, Result};
use crate::model::{modtime_eq, modtime_gt, FileRecord, Job, Progress, VersionRecord};

/// Bound to one `(job, rel_path)`. Talks to the catalog and to the three
/// filesystem locations (source, staging, destination) that path implies.
pub struct FileAgent<'a> {
    catalog: &'a Catalog,
    job: Job,
    rel_path: String,
    span: Span,
}

impl<'a> FileAgent<'a> {
    /// Bind a `FileAgent` to `rel_path` within `job`, creating its catalog
    /// row (at `AtSource`) if none exists yet.
    pub fn new(catalog: &'a Catalog, job: Job, rel_path: String, span: Span) -> Result<Self> {
        let agent = Self {
            catalog,
            job,
            rel_path,
            span,
        };
        agent.ensure_row()?;
        Ok(agent)
    }

    fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn src_path(&self) -> PathBuf {
        Path::new(&self.job.src_dir).join(&self.rel_path)
    }

    pub fn mid_path(&self) -> PathBuf {
        Path::new(&self.job.mid_dir).join(&self.job.name).join(&self.rel_path)
    }

    pub fn dst_path(&self) -> PathBuf {
        Path::new(&self.job.dst_dir).join(&self.job.name).join(&self.rel_path)
    }

    fn archive_dir(&self) -> PathBuf {
        Path::new(&self.job.dst_dir).join(&self.job.name).join(".archive")
    }

    /// Create the catalog row for this path if it doesn't already exist,
    /// populating it from the source file on disk.
    pub fn ensure_row(&self) -> Result<()> {
        let _guard = self.enter();
        if self.catalog.get_file(&self.job.name, &self.rel_path)?.is_some() {
            return Ok(());
        }
        let meta = fs::metadata(self.src_path()).map_err(|e| Error::io(self.src_path(), e))?;
        let checksum = digest_file(&self.src_path())?;
        let record = FileRecord {
            job: self.job.name.clone(),
            rel_path: self.rel_path.clone(),
            size: meta.len(),
            checksum,
            modtime: modtime_secs(&meta),
            progress: Progress::AtSource,
        };
        self.catalog.upsert_file(&record)
    }

    /// Re-read size/checksum/modtime from the source file and reset
    /// progress to `AtSource`. Called when a scan detects the source file
    /// has changed since the record was last refreshed.
    pub fn update_attrs(&self) -> Result<()> {
        let _guard = self.enter();
        let meta = fs::metadata(self.src_path()).map_err(|e| Error::io(self.src_path(), e))?;
        let checksum = digest_file(&self.src_path())?;
        self.catalog.update_attrs(
            &self.job.name,
            &self.rel_path,
            meta.len(),
            &checksum,
            modtime_secs(&meta),
        )
    }

    pub fn mark_for_removal(&self) -> Result<()> {
        let _guard = self.enter();
        self.catalog
            .set_progress(&self.job.name, &self.rel_path, Progress::MarkedForRemoval)
    }

    fn record(&self) -> Result<FileRecord> {
        self.catalog
            .get_file(&self.job.name, &self.rel_path)?
            .ok_or_else(|| Error::FileNotFound {
                job: self.job.name.clone(),
                rel_path: self.rel_path.clone(),
            })
    }

    /// If this file is `AtStaging` but its staging copy has gone missing,
    /// reset it to `AtSource`. Idempotent; a no-op at any other progress.
    pub fn verify_staging(&self) -> Result<()> {
        let _guard = self.enter();
        let record = self.record()?;
        if record.progress == Progress::AtStaging && !self.mid_path().exists() {
            debug!(rel_path = %self.rel_path, "staging file missing, resetting");
            self.catalog
                .set_progress(&self.job.name, &self.rel_path, Progress::AtSource)?;
        }
        Ok(())
    }

    /// Check admission for the next hop: `false` means there isn't enough
    /// free space on the relevant target filesystem to proceed.
    pub fn has_free_space(&self) -> Result<bool> {
        let record = self.record()?;
        let (target_dir, need) = match record.progress {
            Progress::AtSource => (self.mid_path_root(), record.size + self.job.reserved_bytes),
            Progress::AtStaging => (self.dst_path_root(), record.size + self.job.reserved_bytes),
            _ => return Ok(true),
        };
        let free = fs2::available_space(&target_dir).map_err(|e| Error::io(target_dir.clone(), e))?;
        if free < need {
            warn!(path = %target_dir.display(), need, free, "insufficient free space");
            return Ok(false);
        }
        Ok(true)
    }

    fn mid_path_root(&self) -> PathBuf {
        Path::new(&self.job.mid_dir).to_path_buf()
    }

    fn dst_path_root(&self) -> PathBuf {
        Path::new(&self.job.dst_dir).to_path_buf()
    }

    /// Advance this file by exactly one hop. Returns the progress the
    /// record ended up at (which may be unchanged, e.g. on a reconcile
    /// abort or a digest mismatch reset).
    pub fn next_hop(&self) -> Result<Progress> {
        let _guard = self.enter();
        let record = self.record()?;
        match record.progress {
            Progress::AtSource => self.hop_to_staging(&record),
            Progress::AtStaging => self.hop_to_destination(&record),
            other => Ok(other),
        }
    }

    fn hop_to_staging(&self, record: &FileRecord) -> Result<Progress> {
        let mid = self.mid_path();
        if let Some(parent) = mid.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let src = self.src_path();
        debug!(rel_path = %self.rel_path, "copying to staging");
        fs::copy(&src, &mid).map_err(|e| Error::io(&mid, e))?;
        preserve_mtime(&src, &mid);

        let mid_size = fs::metadata(&mid).map_err(|e| Error::io(&mid, e))?.len();
        if mid_size == record.size {
            self.catalog
                .set_progress(&self.job.name, &self.rel_path, Progress::AtStaging)?;
            Ok(Progress::AtStaging)
        } else {
            warn!(rel_path = %self.rel_path, "staging copy size mismatch, leaving at source");
            let _ = fs::remove_file(&mid);
            Ok(Progress::AtSource)
        }
    }

    fn hop_to_destination(&self, record: &FileRecord) -> Result<Progress> {
        if !self.reconcile_destination()? {
            return Ok(Progress::AtStaging);
        }

        let dst = self.dst_path();
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        debug!(rel_path = %self.rel_path, "moving to destination");
        fs::rename(self.mid_path(), &dst).map_err(|e| Error::io(&dst, e))?;

        let dst_checksum = digest_file(&dst)?;
        if dst_checksum == record.checksum {
            self.catalog
                .set_progress(&self.job.name, &self.rel_path, Progress::AtDestination)?;
            Ok(Progress::AtDestination)
        } else {
            warn!(rel_path = %self.rel_path, "destination digest mismatch, resetting to source");
            let _ = fs::remove_file(&dst);
            self.catalog
                .set_progress(&self.job.name, &self.rel_path, Progress::AtSource)?;
            Ok(Progress::AtSource)
        }
    }

    /// Reconcile a pre-existing destination file against the incoming
    /// staging copy before promotion. Returns `true` if promotion should
    /// proceed (destination absent, or archived and cleared), `false` if
    /// the promotion should abort this pass (destination is newer).
    fn reconcile_destination(&self) -> Result<bool> {
        let dst = self.dst_path();
        let mid = self.mid_path();

        let dst_meta = match fs::metadata(&dst) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(Error::io(&dst, e)),
        };
        let mid_meta = fs::metadata(&mid).map_err(|e| Error::io(&mid, e))?;

        let dst_mtime = modtime_secs(&dst_meta);
        let mid_mtime = modtime_secs(&mid_meta);

        if modtime_gt(mid_mtime, dst_mtime) {
            self.archive_version()?;
            Ok(true)
        } else if modtime_gt(dst_mtime, mid_mtime) {
            tracing::error!(path = %dst.display(), "destination file newer than source, aborting promotion");
            Ok(false)
        } else if modtime_eq(dst_mtime, mid_mtime) && dst_meta.len() < mid_meta.len() {
            warn!(path = %dst.display(), "destination smaller than staging, likely partial copy, replacing");
            fs::remove_file(&dst).map_err(|e| Error::io(&dst, e))?;
            Ok(true)
        } else {
            Ok(true)
        }
    }

    /// Move the live destination file into `.archive/`, appending its
    /// modtime to the filename, and record a `VersionRecord`.
    pub fn archive_version(&self) -> Result<bool> {
        let _guard = self.enter();
        let dst = self.dst_path();
        if !dst.exists() {
            warn!(path = %dst.display(), "nothing to archive, destination already absent");
            return Ok(false);
        }
        let meta = fs::metadata(&dst).map_err(|e| Error::io(&dst, e))?;
        let version_time = modtime_secs(&meta);

        let rel = Path::new(&self.rel_path);
        let file_name = rel
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent = rel.parent().unwrap_or(Path::new(""));
        let version_name = format!("{file_name}_{version_time}");
        let version_path = self.archive_dir().join(parent).join(&version_name);

        if let Some(parent_dir) = version_path.parent() {
            fs::create_dir_all(parent_dir).map_err(|e| Error::io(parent_dir, e))?;
        }
        info!(path = %version_path.display(), "archiving previous version");
        fs::rename(&dst, &version_path).map_err(|e| Error::io(&version_path, e))?;

        if version_path.exists() {
            let size = fs::metadata(&version_path)
                .map_err(|e| Error::io(&version_path, e))?
                .len();
            let checksum = digest_file(&version_path)?;
            self.catalog
                .purge_pending_versions(&self.job.name, &self.rel_path, &checksum)?;
            self.catalog.add_version(&VersionRecord {
                version_path: version_path.to_string_lossy().to_string(),
                job: self.job.name.clone(),
                rel_path: self.rel_path.clone(),
                size,
                checksum,
                modtime: version_time,
                status: crate::model::VersionStatus::Success,
            })?;
            Ok(true)
        } else {
            warn!(path = %version_path.display(), "move failed while archiving");
            Ok(false)
        }
    }

    /// Delete old archived versions of this job whose modtime is older
    /// than `prune_age_days`.
    pub fn prune_versions(&self, prune_age_days: f64) -> Result<()> {
        let _guard = self.enter();
        let now = current_unix_time();
        let cutoff = now - prune_age_days * 86_400.0;
        for version in self.catalog.list_versions(&self.job.name, cutoff)? {
            if version.rel_path != self.rel_path {
                continue;
            }
            info!(version = %version.version_path, "pruning old version");
            let path = Path::new(&version.version_path);
            if fs::remove_file(path).is_ok() && !path.exists() {
                self.catalog.delete_version(&version.version_path)?;
            }
        }
        Ok(())
    }

    /// Handle a file marked for removal: archive the destination copy
    /// (default), or delete it outright and drop the catalog row when
    /// `delete_now` is set.
    pub fn sync_deletions(&self, delete_now: bool) -> Result<()> {
        let _guard = self.enter();
        let record = self.record()?;
        if record.progress != Progress::MarkedForRemoval {
            return Ok(());
        }
        if delete_now {
            info!(rel_path = %self.rel_path, "deleting destination file");
            let dst = self.dst_path();
            if dst.exists() {
                fs::remove_file(&dst).map_err(|e| Error::io(&dst, e))?;
            }
            self.catalog.delete_file(&self.job.name, &self.rel_path)?;
        } else {
            self.archive_version()?;
        }
        Ok(())
    }
}

fn modtime_secs(meta: &fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn current_unix_time() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn preserve_mtime(src: &Path, dst: &Path) {
    if let Ok(meta) = fs::metadata(src) {
        if let Ok(mtime) = meta.modified() {
            let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Job;
    use std::fs;

    fn setup() -> (tempfile::TempDir, Job, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let mid = dir.path().join("mid");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&mid).unwrap();
        fs::create_dir_all(&dst).unwrap();

        let job = Job {
            name: "nightly".to_string(),
            src_dir: src.to_string_lossy().to_string(),
            mid_dir: mid.to_string_lossy().to_string(),
            dst_dir: dst.to_string_lossy().to_string(),
            reserved_bytes: 0,
            sync_deletions: true,
            hostname: "host-a".to_string(),
            prune_age_days: 30.0,
        };
        let catalog = Catalog::open_in_memory(Span::none()).unwrap();
        catalog.upsert_job(&job).unwrap();
        (dir, job, catalog)
    }

    #[test]
    fn full_hop_copies_source_to_destination() {
        let (dir, job, catalog) = setup();
        fs::write(Path::new(&job.src_dir).join("a.txt"), b"hello").unwrap();

        let agent = FileAgent::new(&catalog, job.clone(), "a.txt".to_string(), Span::none()).unwrap();
        assert_eq!(agent.next_hop().unwrap(), Progress::AtStaging);
        assert!(agent.mid_path().exists());

        assert_eq!(agent.next_hop().unwrap(), Progress::AtDestination);
        assert!(agent.dst_path().exists());
        assert!(!agent.mid_path().exists());

        let record = catalog.get_file(&job.name, "a.txt").unwrap().unwrap();
        assert_eq!(record.progress, Progress::AtDestination);
        let _ = dir;
    }

    #[test]
    fn verify_staging_resets_on_missing_mid_file() {
        let (_dir, job, catalog) = setup();
        fs::write(Path::new(&job.src_dir).join("a.txt"), b"hello").unwrap();
        let agent = FileAgent::new(&catalog, job.clone(), "a.txt".to_string(), Span::none()).unwrap();
        agent.next_hop().unwrap();
        fs::remove_file(agent.mid_path()).unwrap();

        agent.verify_staging().unwrap();
        let record = catalog.get_file(&job.name, "a.txt").unwrap().unwrap();
        assert_eq!(record.progress, Progress::AtSource);
    }

    #[test]
    fn reconcile_destination_archives_older_file() {
        let (_dir, job, catalog) = setup();
        let src_path = Path::new(&job.src_dir).join("a.txt");
        fs::write(&src_path, b"new content").unwrap();

        let dst_file_dir = Path::new(&job.dst_dir).join(&job.name);
        fs::create_dir_all(&dst_file_dir).unwrap();
        let old_dst = dst_file_dir.join("a.txt");
        fs::write(&old_dst, b"old").unwrap();
        let old_time = filetime::FileTime::from_unix_time(1_000_000, 0);
        filetime::set_file_mtime(&old_dst, old_time).unwrap();

        let new_time = filetime::FileTime::from_unix_time(2_000_000, 0);
        filetime::set_file_mtime(&src_path, new_time).unwrap();

        let agent = FileAgent::new(&catalog, job.clone(), "a.txt".to_string(), Span::none()).unwrap();
        agent.next_hop().unwrap();
        filetime::set_file_mtime(agent.mid_path(), new_time).unwrap();

        let progress = agent.next_hop().unwrap();
        assert_eq!(progress, Progress::AtDestination);

        let archive_dir = dst_file_dir.join(".archive");
        let archived: Vec<_> = fs::read_dir(&archive_dir).unwrap().collect();
        assert_eq!(archived.len(), 1);
    }

    #[test]
    fn sync_deletions_archives_by_default() {
        let (_dir, job, catalog) = setup();
        let src_path = Path::new(&job.src_dir).join("a.txt");
        fs::write(&src_path, b"hello").unwrap();
        let agent = FileAgent::new(&catalog, job.clone(), "a.txt".to_string(), Span::none()).unwrap();
        agent.next_hop().unwrap();
        agent.next_hop().unwrap();
        agent.mark_for_removal().unwrap();

        agent.sync_deletions(false).unwrap();
        assert!(!agent.dst_path().exists());
        let record = catalog.get_file(&job.name, "a.txt").unwrap().unwrap();
        assert_eq!(record.progress, Progress::MarkedForRemoval);
    }

    #[test]
    fn sync_deletions_is_idempotent_once_destination_already_archived() {
        let (_dir, job, catalog) = setup();
        let src_path = Path::new(&job.src_dir).join("a.txt");
        fs::write(&src_path, b"hello").unwrap();
        let agent = FileAgent::new(&catalog, job.clone(), "a.txt".to_string(), Span::none()).unwrap();
        agent.next_hop().unwrap();
        agent.next_hop().unwrap();
        agent.mark_for_removal().unwrap();

        agent.sync_deletions(false).unwrap();
        assert!(!agent.dst_path().exists());

        // A later run (e.g. after resuming a sync_deletions job) calls
        // sync_deletions again on the same still-MarkedForRemoval row; the
        // destination is already gone, so this must not error.
        agent.sync_deletions(false).unwrap();
        let record = catalog.get_file(&job.name, "a.txt").unwrap().unwrap();
        assert_eq!(record.progress, Progress::MarkedForRemoval);
    }

    #[test]
    fn sync_deletions_delete_now_drops_row() {
        let (_dir, job, catalog) = setup();
        let src_path = Path::new(&job.src_dir).join("a.txt");
        fs::write(&src_path, b"hello").unwrap();
        let agent = FileAgent::new(&catalog, job.clone(), "a.txt".to_string(), Span::none()).unwrap();
        agent.next_hop().unwrap();
        agent.next_hop().unwrap();
        agent.mark_for_removal().unwrap();

        agent.sync_deletions(true).unwrap();
        assert!(!agent.dst_path().exists());
        assert!(catalog.get_file(&job.name, "a.txt").unwrap().is_none());
    }
}

//! One-shot reconciliation of a pre-existing destination tree against the
//! catalog, without copying any data.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, Span};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::digest::digest_file;
use crate::error::Result;
use crate::model::{FileFilter, Job, Progress};
use crate::path_norm;

pub struct DestImporter<'a> {
    catalog: &'a Catalog,
    span: Span,
}

impl<'a> DestImporter<'a> {
    pub fn new(catalog: &'a Catalog, span: Span) -> Self {
        Self { catalog, span }
    }

    fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// Walk `dst_dir/<job>` and return a map of normalized rel_path to
    /// content digest, skipping the `.archive` subtree.
    pub fn scan_destination(&self, job: &Job) -> Result<HashMap<String, String>> {
        let _guard = self.enter();
        let root = Path::new(&job.dst_dir).join(&job.name);
        let mut found = HashMap::new();

        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            let rel_path = path_norm::normalize_path(rel);
            if rel_path.is_empty() || rel_path.starts_with(".archive") {
                continue;
            }
            let digest = digest_file(entry.path())?;
            found.insert(rel_path, digest);
        }
        Ok(found)
    }

    /// Scan the source tree first (so every source file has a catalog row),
    /// then mark any catalog row whose destination file already exists with
    /// a matching digest as `AtDestination`, without copying data.
    pub fn import_destination(&self, job: &Job) -> Result<usize> {
        let _guard = self.enter();
        crate::job_runner::JobRunner::new(self.catalog, self.span.clone()).scan_source(job)?;

        let destination = self.scan_destination(job)?;
        let mut imported = 0;

        for record in self.catalog.list_files(&job.name, FileFilter::All)? {
            if record.progress == Progress::AtDestination {
                continue;
            }
            if let Some(dst_digest) = destination.get(&record.rel_path) {
                if *dst_digest == record.checksum {
                    // Promote directly: the file is already verified present
                    // at the destination, so neither the staging hop nor a
                    // fresh copy is needed.
                    self.catalog
                        .set_progress(&job.name, &record.rel_path, Progress::AtDestination)?;
                    imported += 1;
                    info!(rel_path = %record.rel_path, "imported pre-existing destination file");
                }
            }
        }
        Ok(imported)
    }
}

//! Progress reporting trait.
//!
//! Decouples `JobRunner`/`FileAgent` from any specific UI. The `cli` crate
//! provides the human-readable stderr implementation; other front ends can
//! implement the same trait.

use crate::model::{FileRecord, Job, Progress};

/// Receives lifecycle events as a job runs. All methods are called
/// synchronously from the thread driving the job.
pub trait ProgressCallback: Send {
    /// Called once, before the first file of a job is processed.
    fn on_job_started(&self, job: &Job);

    /// Called before a file's next hop is attempted.
    fn on_file_hop_started(&self, job: &Job, file: &FileRecord);

    /// Called after a file's hop completes, with its resulting state.
    fn on_file_hop_completed(&self, job: &Job, rel_path: &str, progress: Progress);

    /// Called once a job has finished iterating its files (pruning may
    /// still follow).
    fn on_job_completed(&self, job: &Job);
}

/// A callback that does nothing. Used when the caller has no interest in
/// progress events (e.g. library consumers driving their own UI loop by
/// polling the catalog directly).
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn on_job_started(&self, _job: &Job) {}
    fn on_file_hop_started(&self, _job: &Job, _file: &FileRecord) {}
    fn on_file_hop_completed(&self, _job: &Job, _rel_path: &str, _progress: Progress) {}
    fn on_job_completed(&self, _job: &Job) {}
}

//! # Cargo Relay Engine
//!
//! A resumable, integrity-checked file-replication engine. For each
//! configured job, files move source → staging → destination, each hop
//! verified by a content digest and recorded in a persistent catalog, so
//! that a killed run resumes from exactly the per-file state it last
//! committed.
//!
//! ## Modules
//!
//! - **model**: `Job`, `FileRecord`, `VersionRecord`, `Progress`.
//! - **error**: crate-wide `Error`/`Result`.
//! - **path_norm**: canonical forward-slash path strings.
//! - **digest**: streaming BLAKE2b-512 content hash.
//! - **config**: typed job configuration surface (`init`/`edit`/batch).
//! - **catalog**: the rusqlite-backed persistent store.
//! - **file_agent**: the per-file state machine.
//! - **job_runner**: scans a source tree and drives every file to completion.
//! - **dest_importer**: adopts a pre-existing destination tree.
//! - **progress**: UI-agnostic lifecycle callback trait.

pub mod catalog;
pub mod config;
pub mod dest_importer;
pub mod digest;
pub mod error;
pub mod file_agent;
pub mod job_runner;
pub mod model;
pub mod path_norm;
pub mod progress;

pub use catalog::Catalog;
pub use config::{BatchConfig, JobEditOptions, JobOptions};
pub use dest_importer::DestImporter;
pub use error::{Error, Result};
pub use file_agent::FileAgent;
pub use job_runner::JobRunner;
pub use model::{FileFilter, FileRecord, Job, JobEdit, Progress, VersionRecord, VersionStatus};
pub use progress::{NullProgress, ProgressCallback};

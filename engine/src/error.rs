//! Error types for the replication engine.
//!
//! `Error` covers every failure site named in the design: path validation,
//! catalog access, digest/IO failures on a hop, and space admission. Errors
//! that the engine can recover from at the file level (missing staging
//! file, digest mismatch) are not represented here — they are handled
//! in-place by `FileAgent` and only ever logged, never propagated.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("job not found: {name}")]
    JobNotFound { name: String },

    #[error("job already exists: {name}")]
    JobAlreadyExists { name: String },

    #[error("path is not absolute: {path}")]
    NotAbsolute { path: String },

    #[error("file record not found: job={job} rel_path={rel_path}")]
    FileNotFound { job: String, rel_path: String },

    #[error("source path vanished: {path}")]
    SourceVanished { path: PathBuf },

    #[error("insufficient free space on {path}: need {need} bytes, have {have} bytes")]
    OutOfSpace {
        path: PathBuf,
        need: u64,
        have: u64,
    },

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

//! Error types shared by the library modules.

use std::path::PathBuf;

use thiserror::Error;

use crate::classfile::ClassFileError;

/// Rejection of the classpath as a whole. Raised before any worker starts.
#[derive(Debug, Error)]
pub enum PathValidationError {
    #[error("classpath entry does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("classpath entry is neither a jar archive nor a directory: {}", .0.display())]
    Unsupported(PathBuf),
}

/// Failure to read a single archive, directory entry or classfile.
///
/// These never fail a scan: the scheduler logs them and moves on.
#[derive(Debug, Error)]
pub enum EntryReadError {
    #[error("failed to read {entry} from {}: {source}", .root.display())]
    Io {
        root: PathBuf,
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read archive entry {entry} from {}: {source}", .root.display())]
    Archive {
        root: PathBuf,
        entry: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("undecodable classfile {entry} in {}: {source}", .root.display())]
    ClassFile {
        root: PathBuf,
        entry: String,
        #[source]
        source: ClassFileError,
    },

    #[error("worker panicked on {entry} in {}: {message}", .root.display())]
    Panicked {
        root: PathBuf,
        entry: String,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler already started; a scanner instance cannot be reused")]
    AlreadyStarted,

    #[error("failed to build ingestion worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to spawn ingestion coordinator: {0}")]
    Spawn(#[from] std::io::Error),
}

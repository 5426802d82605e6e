use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::object::{Id, ParseObjectError};

/// Describes the ways an `ObjectSource` call can fail.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{} is not a git repository", .0.display())]
    RepoNotFound(PathBuf),

    #[error("reference `{0}` not found")]
    RefNotFound(String),

    #[error("object {0} not found")]
    ObjectNotFound(Id),

    #[error("corrupt repository data: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Parse(#[from] ParseObjectError),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("{0}")]
    Command(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for `ObjectSource` operations.
pub type Result<T> = std::result::Result<T, SourceError>;

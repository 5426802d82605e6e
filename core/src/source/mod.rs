//! The `ObjectSource` abstraction: how a view gets refs, trees and blobs
//! out of a repository without caring which backend does the work.

mod command;
pub use command::run_with_timeout;

mod error;
pub use error::{Result, SourceError};

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::object::{CommitInfo, Id, TreeEntry};

/// A struct that implements the `ObjectSource` trait knows how to read
/// objects out of a repository on the local file system.
///
/// `repo` is always the repository root: a bare repository directory or a
/// working copy containing `.git`. Every call is expected to finish within
/// the implementation's configured timeout and to fail with
/// [`SourceError::RepoNotFound`] when `repo` is not a repository.
///
/// [`SourceError::RepoNotFound`]: enum.SourceError.html#variant.RepoNotFound
pub trait ObjectSource: Send + Sync {
    /// Resolve `name` to the id of the commit it points at.
    ///
    /// Fails with [`SourceError::RefNotFound`] when the name doesn't resolve,
    /// which includes a branch name in an empty repository.
    ///
    /// [`SourceError::RefNotFound`]: enum.SourceError.html#variant.RefNotFound
    fn resolve_ref(&self, repo: &Path, name: &str) -> Result<Id>;

    /// Read the tree id and committer time of a commit.
    fn read_commit(&self, repo: &Path, id: &Id) -> Result<CommitInfo>;

    /// List the direct entries of a tree object.
    fn fetch_tree(&self, repo: &Path, id: &Id) -> Result<Vec<TreeEntry>>;

    /// Read the full content of a blob.
    fn fetch_blob(&self, repo: &Path, id: &Id) -> Result<Vec<u8>>;

    /// Return the size of a blob in bytes.
    fn blob_size(&self, repo: &Path, id: &Id) -> Result<u64>;
}

/// Settings shared by the `ObjectSource` backends.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Upper bound on the duration of each call.
    pub timeout: Duration,

    /// Program used by the subprocess backend.
    pub git: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            timeout: Duration::from_secs(3),
            git: PathBuf::from("git"),
        }
    }
}

/// Run `f` on a worker thread and give up waiting for it after `timeout`.
///
/// The worker is detached on timeout; its eventual result is discarded.
pub fn bounded<T, F>(timeout: Duration, what: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("gitbarefs-source".to_owned())
        .spawn(move || {
            let _ = tx.send(f());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(SourceError::Timeout {
            what: what.to_owned(),
            after: timeout,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(SourceError::Command(format!(
            "{} worker exited without a result",
            what
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_returns_result() {
        let r = bounded(Duration::from_secs(5), "add", || Ok(2 + 2)).unwrap();
        assert_eq!(r, 4);
    }

    #[test]
    fn bounded_passes_errors_through() {
        let err = bounded::<(), _>(Duration::from_secs(5), "lookup", || {
            Err(SourceError::RefNotFound("main".to_owned()))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "reference `main` not found");
    }

    #[test]
    fn bounded_times_out() {
        let err = bounded(Duration::from_millis(50), "slow read", || {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "slow read timed out after 50ms");
    }

    #[test]
    fn default_config() {
        let config = SourceConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.git, PathBuf::from("git"));
    }
}

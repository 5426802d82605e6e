use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gitbarefs_core::lock::ReadWriteLock;
use gitbarefs_core::object::{parse_commit, parse_tree, CommitInfo, Id, Kind, TreeEntry};
use gitbarefs_core::source::{self, ObjectSource, Result, SourceConfig, SourceError};
use tracing::debug;

use crate::{find_git_dir, odb::Odb, refs};

/// Implementation of `ObjectSource` that reads loose objects, pack files
/// and refs directly from the repository's git directory.
///
/// Pack indexes are loaded once per repository and reloaded when the
/// pack directory changes. Each call runs on a worker thread so that it
/// can be abandoned after the configured timeout.
#[derive(Clone)]
pub struct OnDiskSource {
    inner: Arc<Inner>,
    timeout: Duration,
}

#[derive(Default)]
struct Inner {
    odbs: ReadWriteLock<HashMap<PathBuf, Arc<Odb>>>,
}

impl OnDiskSource {
    pub fn new(config: &SourceConfig) -> OnDiskSource {
        OnDiskSource {
            inner: Arc::new(Inner::default()),
            timeout: config.timeout,
        }
    }

    fn call<T, F>(&self, what: &str, repo: &Path, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&Path, &Odb) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        let repo = repo.to_path_buf();

        source::bounded(self.timeout, what, move || {
            let git_dir = find_git_dir(&repo)?;
            let odb = inner.odb(&git_dir, false)?;

            match f(&git_dir, &odb) {
                // Objects may have moved into a pack we haven't loaded yet.
                Err(SourceError::ObjectNotFound(_)) | Err(SourceError::RefNotFound(_))
                    if !odb.is_current() =>
                {
                    let odb = inner.odb(&git_dir, true)?;
                    f(&git_dir, &odb)
                }
                result => result,
            }
        })
    }
}

impl Default for OnDiskSource {
    fn default() -> Self {
        OnDiskSource::new(&SourceConfig::default())
    }
}

impl Inner {
    fn odb(&self, git_dir: &Path, reload: bool) -> Result<Arc<Odb>> {
        if !reload {
            if let Some(odb) = self.odbs.read().get(git_dir) {
                if odb.is_current() {
                    return Ok(odb.clone());
                }
            }
        }

        let mut odbs = self.odbs.write();

        if let Some(odb) = odbs.get(git_dir) {
            if odb.is_current() && !reload {
                return Ok(odb.clone());
            }
        }

        debug!(git_dir = %git_dir.display(), "loading pack indexes");
        let odb = Arc::new(Odb::open(git_dir)?);
        odbs.insert(git_dir.to_path_buf(), odb.clone());
        Ok(odb)
    }
}

impl ObjectSource for OnDiskSource {
    fn resolve_ref(&self, repo: &Path, name: &str) -> Result<Id> {
        let name = name.to_owned();
        self.call("resolve ref", repo, move |git_dir, odb| {
            refs::resolve(odb, git_dir, &name)
        })
    }

    fn read_commit(&self, repo: &Path, id: &Id) -> Result<CommitInfo> {
        let id = *id;
        self.call("read commit", repo, move |_, odb| {
            let data = odb.read_kind(&id, Kind::Commit)?;
            Ok(parse_commit(id, &data)?)
        })
    }

    fn fetch_tree(&self, repo: &Path, id: &Id) -> Result<Vec<TreeEntry>> {
        let id = *id;
        self.call("read tree", repo, move |_, odb| {
            let data = odb.read_kind(&id, Kind::Tree)?;
            Ok(parse_tree(&data)?)
        })
    }

    fn fetch_blob(&self, repo: &Path, id: &Id) -> Result<Vec<u8>> {
        let id = *id;
        self.call("read blob", repo, move |_, odb| {
            odb.read_kind(&id, Kind::Blob)
        })
    }

    fn blob_size(&self, repo: &Path, id: &Id) -> Result<u64> {
        let id = *id;
        self.call("read blob size", repo, move |_, odb| {
            match odb.header(&id)? {
                (Kind::Blob, size) => Ok(size),
                _ => Err(SourceError::ObjectNotFound(id)),
            }
        })
    }
}

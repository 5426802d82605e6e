//! A read-only view of one repository at one ref.

mod snapshot;
pub use snapshot::{BlobEntry, DirEntry, TreeSnapshot};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tracing::{info, warn};

use crate::annex::{self, AnnexFile};
use crate::attr::{commit_time, FileAttr, NodeKind};
use crate::cache::{CacheConfig, ContentCache};
use crate::fs::{self, wants_write, FsError, ReadOnlyFs, Result};
use crate::handles::FileHandleTable;
use crate::lock::ReadWriteLock;
use crate::object::{Id, ModeTable, ObjectMode};
use crate::source::{ObjectSource, SourceError};

#[derive(Clone, Debug)]
pub struct ViewConfig {
    pub modes: ModeTable,

    /// Substitute annexed content for annex pointer symlinks.
    pub annex: bool,

    /// Ceiling on live file handles across all views sharing a context.
    pub max_handles: usize,

    /// Report a missing ref as a missing root rather than an empty one.
    pub strict_ref: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            modes: ModeTable::default(),
            annex: true,
            max_handles: 1024,
            strict_ref: false,
        }
    }
}

/// The collaborators shared by every `RepoView` in a process.
#[derive(Clone)]
pub struct ViewContext {
    pub source: Arc<dyn ObjectSource>,
    pub cache: Arc<ContentCache>,
    pub handles: Arc<FileHandleTable>,
    pub config: ViewConfig,
}

impl ViewContext {
    pub fn new(source: Arc<dyn ObjectSource>, cache: CacheConfig, config: ViewConfig) -> Self {
        ViewContext {
            source,
            cache: Arc::new(ContentCache::new(cache)),
            handles: Arc::new(FileHandleTable::new(config.max_handles)),
            config,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RefState {
    Resolved(Id),
    Missing,
}

#[derive(Default)]
struct ViewState {
    snapshot: Option<Arc<TreeSnapshot>>,
    seen: Option<RefState>,
}

/// Serves one repository's tree at the commit a ref currently names.
///
/// The tree is read in full into a `TreeSnapshot` the first time it is
/// needed and again whenever the ref has moved. A rebuild revokes every
/// file handle opened against the previous snapshot and drops the
/// repository's cached content.
pub struct RepoView {
    repo: PathBuf,
    ref_name: String,
    ctx: ViewContext,
    state: ReadWriteLock<ViewState>,
}

impl RepoView {
    pub fn new<P: Into<PathBuf>>(repo: P, ref_name: &str, ctx: ViewContext) -> Self {
        RepoView {
            repo: repo.into(),
            ref_name: ref_name.to_owned(),
            ctx,
            state: ReadWriteLock::default(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    fn resolve(&self) -> std::result::Result<RefState, SourceError> {
        match self.ctx.source.resolve_ref(&self.repo, &self.ref_name) {
            Ok(id) => Ok(RefState::Resolved(id)),
            Err(SourceError::RefNotFound(_)) => Ok(RefState::Missing),
            Err(err) => Err(err),
        }
    }

    /// True if the ref no longer names the commit the snapshot was built from.
    pub fn is_stale(&self) -> Result<bool> {
        let current = self.resolve()?;
        Ok(self.state.read().seen != Some(current))
    }

    /// Rebuild the snapshot if the ref has moved.
    ///
    /// A failed rebuild leaves the previous snapshot in place and is
    /// retried by the next call.
    pub fn ensure_fresh(&self) -> Result<()> {
        if !self.is_stale()? {
            return Ok(());
        }

        let mut state = self.state.write();

        let current = self.resolve()?;
        if state.seen == Some(current) {
            return Ok(());
        }

        state.snapshot = match current {
            RefState::Resolved(id) => {
                let start = Instant::now();
                let commit = self.ctx.source.read_commit(&self.repo, &id)?;
                let snapshot = TreeSnapshot::build(&*self.ctx.source, &self.repo, &commit)?;

                info!(
                    repo = %self.repo.display(),
                    commit = %id,
                    dirs = snapshot.tree.len(),
                    elapsed = ?start.elapsed(),
                    "rebuilt tree snapshot"
                );
                Some(Arc::new(snapshot))
            }
            RefState::Missing => {
                warn!(
                    repo = %self.repo.display(),
                    root_object = %self.ref_name,
                    "root object does not exist; mount point will be empty"
                );
                None
            }
        };
        state.seen = Some(current);

        self.ctx.handles.remove_all(&self.repo);
        self.ctx.cache.invalidate_repo(&self.repo);

        Ok(())
    }

    /// The current snapshot, without checking whether the ref has moved.
    fn current(&self) -> Option<Arc<TreeSnapshot>> {
        self.state.read().snapshot.clone()
    }

    fn annex_file(&self, path: &str, blob: &BlobEntry) -> Result<Option<AnnexFile>> {
        if blob.mode != ObjectMode::Symlink || !self.ctx.config.annex {
            return Ok(None);
        }

        let target = blob.link_target(&*self.ctx.source, &self.repo)?;
        let (parent, _) = fs::split(path);
        Ok(annex::resolve(&self.repo, parent, target))
    }

    fn empty_root(&self, path: &str) -> Result<FileAttr> {
        if path == "/" && !self.ctx.config.strict_ref {
            Ok(FileAttr::directory(&self.ctx.config.modes, SystemTime::now()))
        } else {
            Err(FsError::NotFound(path.to_owned()))
        }
    }
}

impl ReadOnlyFs for RepoView {
    fn getattr(&self, path: &str) -> Result<FileAttr> {
        self.ensure_fresh()?;
        let path = fs::normalize(path);

        let snapshot = match self.current() {
            Some(snapshot) => snapshot,
            None => return self.empty_root(&path),
        };

        let modes = &self.ctx.config.modes;
        let time = commit_time(snapshot.commit_time);

        if snapshot.is_dir(&path) {
            return Ok(FileAttr::directory(modes, time));
        }

        let blob = snapshot
            .blob(&path)
            .ok_or_else(|| FsError::NotFound(path.clone()))?;

        if let Some(file) = self.annex_file(&path, blob)? {
            return Ok(file.attr(modes, time));
        }

        let size = blob.size(&*self.ctx.source, &self.repo)?;
        Ok(FileAttr::blob(modes, blob.mode, size, time))
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_fresh()?;
        let path = fs::normalize(path);

        Ok(self
            .current()
            .and_then(|snapshot| snapshot.dir(&path).map(|d| d.children.clone()))
            .unwrap_or_default())
    }

    fn readdir_kinds(&self, path: &str) -> Result<Vec<(String, NodeKind)>> {
        self.ensure_fresh()?;
        let path = fs::normalize(path);

        let snapshot = match self.current() {
            Some(snapshot) => snapshot,
            None => return Ok(Vec::new()),
        };

        let dir = match snapshot.dir(&path) {
            Some(dir) => dir,
            None => return Ok(Vec::new()),
        };

        // Only symlinks need a backend read, to see whether they are
        // annex pointers with content present.
        Ok(dir
            .children
            .iter()
            .map(|name| {
                let kind = match dir.blobs.get(name) {
                    None => NodeKind::Directory,
                    Some(blob) if blob.mode == ObjectMode::Symlink => {
                        match self.annex_file(&fs::join(&path, name), blob) {
                            Ok(Some(_)) => NodeKind::RegularFile,
                            _ => NodeKind::Symlink,
                        }
                    }
                    Some(_) => NodeKind::RegularFile,
                };
                (name.clone(), kind)
            })
            .collect())
    }

    fn readlink(&self, path: &str) -> Result<Vec<u8>> {
        self.ensure_fresh()?;
        let path = fs::normalize(path);

        let snapshot = self
            .current()
            .ok_or_else(|| FsError::NotFound(path.clone()))?;

        match snapshot.blob(&path) {
            Some(blob) if blob.mode == ObjectMode::Symlink => {
                Ok(blob.link_target(&*self.ctx.source, &self.repo)?.to_vec())
            }
            _ => Err(FsError::NotFound(path)),
        }
    }

    fn open(&self, path: &str, flags: i32) -> Result<u64> {
        if wants_write(flags) {
            return Err(FsError::ReadOnly);
        }

        self.ensure_fresh()?;
        let path = fs::normalize(path);

        // Allocate under the read lock so no rebuild slips in between the
        // existence check and the handle being issued.
        let state = self.state.read();
        let exists = match &state.snapshot {
            Some(snapshot) => snapshot.is_dir(&path) || snapshot.blob(&path).is_some(),
            None => path == "/",
        };

        if !exists {
            return Err(FsError::NotFound(path));
        }

        self.ctx.handles.get(&self.repo)
    }

    fn read(&self, path: &str, size: usize, offset: u64, fh: u64) -> Result<Vec<u8>> {
        let path = fs::normalize(path);

        let snapshot = {
            let state = self.state.read();
            if !self.ctx.handles.is_valid(&self.repo, fh) {
                return Err(FsError::BadHandle(fh));
            }
            state.snapshot.clone()
        };

        let snapshot = snapshot.ok_or_else(|| FsError::NotFound(path.clone()))?;
        if snapshot.is_dir(&path) {
            return Err(FsError::IsDir(path));
        }

        let blob = snapshot
            .blob(&path)
            .ok_or_else(|| FsError::NotFound(path.clone()))?;

        if let Some(file) = self.annex_file(&path, blob)? {
            return file
                .read_range(size, offset)
                .map_err(|err| FsError::Backend(err.into()));
        }

        let declared = blob.size(&*self.ctx.source, &self.repo)?;
        Ok(self.ctx.cache.fetch_or_insert(
            &*self.ctx.source,
            &self.repo,
            &path,
            &blob.id,
            declared,
            size,
            offset,
        )?)
    }

    fn release(&self, _path: &str, fh: u64) -> Result<()> {
        self.ctx.handles.remove(&self.repo, fh)
    }
}

impl Drop for RepoView {
    fn drop(&mut self) {
        self.ctx.handles.remove_all(&self.repo);
        self.ctx.cache.invalidate_repo(&self.repo);
    }
}

#[cfg(test)]
mod tests;

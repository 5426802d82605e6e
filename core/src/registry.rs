//! Discovery of many repositories under one directory, and routing of
//! paths to the `RepoView` that serves them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::attr::{FileAttr, NodeKind};
use crate::fs::{self, FsError, ReadOnlyFs, Result};
use crate::lock::ReadWriteLock;
use crate::repo::{RepoView, ViewContext};

/// Controls how often the directory tree is scanned for repositories.
#[derive(Clone, Debug)]
pub struct RescanPolicy {
    /// Never rescan sooner than this after the previous scan.
    pub min_interval: Duration,

    /// Otherwise wait this many times as long as the previous scan took.
    pub factor: u32,
}

impl RescanPolicy {
    pub fn delay_after(&self, scan: Duration) -> Duration {
        self.min_interval.max(scan * self.factor)
    }
}

impl Default for RescanPolicy {
    fn default() -> Self {
        RescanPolicy {
            min_interval: Duration::from_secs(6),
            factor: 100,
        }
    }
}

/// Where a path within a set of repositories leads.
pub enum Dispatch {
    /// Inside a repository: the view and the path relative to its root.
    Repo(Arc<RepoView>, String),

    /// A directory above one or more repositories, with its entries.
    Intermediate(Vec<String>),

    NotFound,
}

/// A set of named repository views. Names are relative paths such as
/// `team/project` and double as the directory structure above each
/// repository.
#[derive(Default)]
pub struct RepoSet {
    views: BTreeMap<String, Arc<RepoView>>,
}

impl RepoSet {
    /// Replace the set's contents with `found`, keeping the existing view
    /// (and so its snapshot and handles) for every repository still present.
    pub fn update(&mut self, found: BTreeMap<String, PathBuf>, ref_name: &str, ctx: &ViewContext) {
        let mut views = BTreeMap::new();

        for (name, path) in found {
            let view = match self.views.remove(&name) {
                Some(view) if view.repo_path() == path => view,
                _ => Arc::new(RepoView::new(path, ref_name, ctx.clone())),
            };
            views.insert(name, view);
        }

        self.views = views;
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.views.keys()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RepoView>> {
        self.views.get(name)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Route a normalized path. The longest repository name that is a
    /// whole-component prefix of the path wins.
    pub fn dispatch(&self, path: &str) -> Dispatch {
        self.dispatch_filtered(path, |_| true)
    }

    /// Like `dispatch`, but only repositories whose name passes `visible`
    /// are considered.
    pub fn dispatch_filtered<F>(&self, path: &str, visible: F) -> Dispatch
    where
        F: Fn(&str) -> bool,
    {
        let rel = path.trim_start_matches('/');

        let mut best: Option<(&String, &Arc<RepoView>)> = None;
        for (name, view) in &self.views {
            if !visible(name.as_str()) {
                continue;
            }

            let matches = rel == name.as_str()
                || (rel.starts_with(name.as_str()) && rel[name.len()..].starts_with('/'));

            if matches && best.map_or(true, |(b, _)| name.len() > b.len()) {
                best = Some((name, view));
            }
        }

        if let Some((name, view)) = best {
            return Dispatch::Repo(view.clone(), fs::normalize(&rel[name.len()..]));
        }

        let mut children = BTreeSet::new();
        for name in self.views.keys().filter(|n| visible(n.as_str())) {
            let below = if rel.is_empty() {
                Some(name.as_str())
            } else if name.starts_with(rel) && name[rel.len()..].starts_with('/') {
                Some(&name[rel.len() + 1..])
            } else {
                None
            };

            if let Some(below) = below {
                if let Some(first) = below.split('/').next() {
                    children.insert(first.to_owned());
                }
            }
        }

        if rel.is_empty() || !children.is_empty() {
            Dispatch::Intermediate(children.into_iter().collect())
        } else {
            Dispatch::NotFound
        }
    }
}

/// Find every repository below `root`.
///
/// A bare repository `x/name.git` is named `x/name`, as is a working copy
/// `x/name` holding a `.git` entry. The scan does not look inside a
/// repository once it has found one.
pub fn discover(root: &Path) -> BTreeMap<String, PathBuf> {
    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        let rel = match path.strip_prefix(root).ok().and_then(Path::to_str) {
            Some(rel) => rel,
            None => continue,
        };

        let name = if let Some(stem) = rel.strip_suffix(".git") {
            stem
        } else if path.join(".git").exists() {
            rel
        } else {
            continue;
        };

        walker.skip_current_dir();

        if name.is_empty() || name.ends_with('/') {
            continue;
        }

        if let Some(previous) = found.get(name) {
            warn!(
                name,
                kept = %previous.display(),
                ignored = %path.display(),
                "two repositories map to the same name"
            );
            continue;
        }

        found.insert(name.to_owned(), path.to_owned());
    }

    found
}

struct RegistryState {
    repos: RepoSet,
    next_scan: Option<Instant>,
}

/// Serves every repository found below a directory, each at the same ref.
pub struct RepoRegistry {
    root: PathBuf,
    ref_name: String,
    ctx: ViewContext,
    policy: RescanPolicy,
    created: SystemTime,
    state: ReadWriteLock<RegistryState>,
}

impl RepoRegistry {
    pub fn new<P: Into<PathBuf>>(
        root: P,
        ref_name: &str,
        ctx: ViewContext,
        policy: RescanPolicy,
    ) -> Self {
        RepoRegistry {
            root: root.into(),
            ref_name: ref_name.to_owned(),
            ctx,
            policy,
            created: SystemTime::now(),
            state: ReadWriteLock::new(RegistryState {
                repos: RepoSet::default(),
                next_scan: None,
            }),
        }
    }

    /// Rescan if the adaptive interval since the last scan has passed.
    pub fn maybe_rescan(&self) {
        let due = |next: Option<Instant>| next.map_or(true, |t| Instant::now() >= t);

        if !due(self.state.read().next_scan) {
            return;
        }

        let mut state = self.state.write();
        if !due(state.next_scan) {
            return;
        }

        let start = Instant::now();
        let found = discover(&self.root);
        let elapsed = start.elapsed();

        state.repos.update(found, &self.ref_name, &self.ctx);
        state.next_scan = Some(Instant::now() + self.policy.delay_after(elapsed));

        info!(
            root = %self.root.display(),
            repos = state.repos.len(),
            elapsed = ?elapsed,
            "scanned for repositories"
        );
    }

    /// Route a path to the repository that serves it.
    pub fn dispatch(&self, path: &str) -> Dispatch {
        self.maybe_rescan();
        self.state.read().repos.dispatch(&fs::normalize(path))
    }

    /// Names of the repositories found by the latest scan.
    pub fn repo_names(&self) -> Vec<String> {
        self.maybe_rescan();
        self.state.read().repos.names().cloned().collect()
    }

    fn synthetic_dir(&self) -> FileAttr {
        FileAttr::directory(&self.ctx.config.modes, self.created)
    }
}

impl ReadOnlyFs for RepoRegistry {
    fn getattr(&self, path: &str) -> Result<FileAttr> {
        match self.dispatch(path) {
            Dispatch::Repo(view, rel) => view.getattr(&rel),
            Dispatch::Intermediate(_) => Ok(self.synthetic_dir()),
            Dispatch::NotFound => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        match self.dispatch(path) {
            Dispatch::Repo(view, rel) => view.readdir(&rel),
            Dispatch::Intermediate(children) => Ok(children),
            Dispatch::NotFound => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn readdir_kinds(&self, path: &str) -> Result<Vec<(String, NodeKind)>> {
        match self.dispatch(path) {
            Dispatch::Repo(view, rel) => view.readdir_kinds(&rel),
            Dispatch::Intermediate(children) => Ok(fs::directories(children)),
            Dispatch::NotFound => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn readlink(&self, path: &str) -> Result<Vec<u8>> {
        match self.dispatch(path) {
            Dispatch::Repo(view, rel) => view.readlink(&rel),
            _ => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn open(&self, path: &str, flags: i32) -> Result<u64> {
        match self.dispatch(path) {
            Dispatch::Repo(view, rel) => view.open(&rel, flags),
            _ if fs::wants_write(flags) => Err(FsError::ReadOnly),
            _ => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn read(&self, path: &str, size: usize, offset: u64, fh: u64) -> Result<Vec<u8>> {
        match self.dispatch(path) {
            Dispatch::Repo(view, rel) => view.read(&rel, size, offset, fh),
            _ => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn release(&self, path: &str, fh: u64) -> Result<()> {
        match self.dispatch(path) {
            Dispatch::Repo(view, rel) => view.release(&rel, fh),
            _ => Err(FsError::BadHandle(fh)),
        }
    }
}

//! An in-memory `ObjectSource` for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::object::{CommitInfo, FileMode, Id, Kind, TreeEntry};
use crate::source::{ObjectSource, Result, SourceError};

/// Holds any number of fake repositories, keyed by path, and counts the
/// calls made against them.
#[derive(Default)]
pub(crate) struct MemorySource {
    repos: Mutex<HashMap<PathBuf, MemoryRepo>>,
    resolves: AtomicUsize,
    tree_fetches: AtomicUsize,
    blob_fetches: AtomicUsize,
    size_calls: AtomicUsize,
    failing: AtomicBool,
    tree_delay: Mutex<Duration>,
    seq: AtomicUsize,
}

#[derive(Default)]
struct MemoryRepo {
    refs: HashMap<String, Id>,
    commits: HashMap<Id, CommitInfo>,
    trees: HashMap<Id, Vec<TreeEntry>>,
    blobs: HashMap<Id, Vec<u8>>,
}

enum Node {
    Dir(BTreeMap<String, Node>),
    Blob(FileMode, Id),
}

impl MemorySource {
    pub(crate) fn new() -> Self {
        MemorySource::default()
    }

    pub(crate) fn blob_id(content: &str) -> Id {
        Id::for_object(Kind::Blob, content.as_bytes())
    }

    /// Register an empty repository (no refs at all).
    pub(crate) fn add_repo(&self, repo: &str) {
        self.repos.lock().entry(PathBuf::from(repo)).or_default();
    }

    /// Record a commit whose tree holds exactly `files` and point
    /// `ref_name` at it. Paths may contain `/` to create subdirectories.
    pub(crate) fn commit(
        &self,
        repo: &str,
        ref_name: &str,
        files: &[(&str, FileMode, &str)],
        time: i64,
    ) -> Id {
        let mut root = BTreeMap::new();
        let mut repos = self.repos.lock();
        let r = repos.entry(PathBuf::from(repo)).or_default();

        for (path, mode, content) in files {
            let id = MemorySource::blob_id(content);
            r.blobs.insert(id, content.as_bytes().to_vec());

            let parts: Vec<&str> = path.split('/').collect();
            let mut dir = &mut root;
            for part in &parts[..parts.len() - 1] {
                let node = dir
                    .entry(part.to_string())
                    .or_insert_with(|| Node::Dir(BTreeMap::new()));
                dir = match node {
                    Node::Dir(children) => children,
                    Node::Blob(..) => panic!("{} is both a file and a directory", part),
                };
            }
            dir.insert(parts[parts.len() - 1].to_string(), Node::Blob(*mode, id));
        }

        let tree = store_tree(r, &root);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let id = Id::for_object(
            Kind::Commit,
            format!("tree {}\ntime {}\nseq {}\n", tree, time, seq).as_bytes(),
        );

        r.commits.insert(id, CommitInfo { id, tree, time });
        r.refs.insert(ref_name.to_owned(), id);
        id
    }

    pub(crate) fn remove_ref(&self, repo: &str, ref_name: &str) {
        if let Some(r) = self.repos.lock().get_mut(Path::new(repo)) {
            r.refs.remove(ref_name);
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_tree_delay(&self, delay: Duration) {
        *self.tree_delay.lock() = delay;
    }

    #[allow(dead_code)]
    pub(crate) fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub(crate) fn tree_fetches(&self) -> usize {
        self.tree_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn blob_fetches(&self) -> usize {
        self.blob_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn size_calls(&self) -> usize {
        self.size_calls.load(Ordering::SeqCst)
    }

    fn with_repo<T, F>(&self, repo: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&MemoryRepo) -> Result<T>,
    {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Command("injected failure".to_owned()));
        }

        let repos = self.repos.lock();
        match repos.get(repo) {
            Some(r) => f(r),
            None => Err(SourceError::RepoNotFound(repo.to_owned())),
        }
    }
}

fn store_tree(repo: &mut MemoryRepo, dir: &BTreeMap<String, Node>) -> Id {
    let entries: Vec<TreeEntry> = dir
        .iter()
        .map(|(name, node)| match node {
            Node::Dir(children) => TreeEntry {
                mode: FileMode::Tree,
                id: store_tree(repo, children),
                name: name.clone(),
            },
            Node::Blob(mode, id) => TreeEntry {
                mode: *mode,
                id: *id,
                name: name.clone(),
            },
        })
        .collect();

    let id = Id::for_object(Kind::Tree, format!("{:?}", entries).as_bytes());
    repo.trees.insert(id, entries);
    id
}

impl ObjectSource for MemorySource {
    fn resolve_ref(&self, repo: &Path, name: &str) -> Result<Id> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.with_repo(repo, |r| {
            r.refs
                .get(name)
                .copied()
                .ok_or_else(|| SourceError::RefNotFound(name.to_owned()))
        })
    }

    fn read_commit(&self, repo: &Path, id: &Id) -> Result<CommitInfo> {
        self.with_repo(repo, |r| {
            r.commits
                .get(id)
                .copied()
                .ok_or(SourceError::ObjectNotFound(*id))
        })
    }

    fn fetch_tree(&self, repo: &Path, id: &Id) -> Result<Vec<TreeEntry>> {
        self.tree_fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.tree_delay.lock();
        if delay > Duration::from_millis(0) {
            thread::sleep(delay);
        }

        self.with_repo(repo, |r| {
            r.trees
                .get(id)
                .cloned()
                .ok_or(SourceError::ObjectNotFound(*id))
        })
    }

    fn fetch_blob(&self, repo: &Path, id: &Id) -> Result<Vec<u8>> {
        self.blob_fetches.fetch_add(1, Ordering::SeqCst);
        self.with_repo(repo, |r| {
            r.blobs
                .get(id)
                .cloned()
                .ok_or(SourceError::ObjectNotFound(*id))
        })
    }

    fn blob_size(&self, repo: &Path, id: &Id) -> Result<u64> {
        self.size_calls.fetch_add(1, Ordering::SeqCst);
        self.with_repo(repo, |r| {
            r.blobs
                .get(id)
                .map(|b| b.len() as u64)
                .ok_or(SourceError::ObjectNotFound(*id))
        })
    }
}

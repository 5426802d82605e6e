use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::OnceLock;

use tracing::debug;

use crate::fs::{join, split};
use crate::object::{CommitInfo, FileMode, Id, ObjectMode};
use crate::source::{ObjectSource, Result};

/// A file, executable, or symlink in a snapshot.
#[derive(Debug)]
pub struct BlobEntry {
    pub mode: ObjectMode,
    pub id: Id,
    size: OnceLock<u64>,
    content: OnceLock<Vec<u8>>,
}

impl BlobEntry {
    pub fn new(mode: ObjectMode, id: Id) -> Self {
        BlobEntry {
            mode,
            id,
            size: OnceLock::new(),
            content: OnceLock::new(),
        }
    }

    /// Blob size, asked of the source the first time it is needed.
    pub fn size(&self, source: &dyn ObjectSource, repo: &Path) -> Result<u64> {
        if let Some(size) = self.size.get() {
            return Ok(*size);
        }

        let size = source.blob_size(repo, &self.id)?;
        Ok(*self.size.get_or_init(|| size))
    }

    /// Target of a symlink entry. Symlink blobs are tiny and asked for on
    /// every `getattr`, so the content is kept with the entry.
    pub fn link_target(&self, source: &dyn ObjectSource, repo: &Path) -> Result<&[u8]> {
        if let Some(target) = self.content.get() {
            return Ok(target);
        }

        let target = source.fetch_blob(repo, &self.id)?;
        let _ = self.size.set(target.len() as u64);
        Ok(self.content.get_or_init(|| target))
    }
}

/// One directory of a snapshot. A child listed in `children` but absent
/// from `blobs` is a subdirectory.
#[derive(Debug, Default)]
pub struct DirEntry {
    pub children: Vec<String>,
    pub blobs: HashMap<String, BlobEntry>,
}

/// The complete directory structure of one commit.
///
/// Every directory reachable from `/` has a key in `tree`. Snapshots are
/// never modified after `build` returns; a newer commit gets a new one.
#[derive(Debug)]
pub struct TreeSnapshot {
    pub commit_id: Id,
    pub tree_id: Id,
    pub commit_time: i64,
    pub tree: HashMap<String, DirEntry>,
}

impl TreeSnapshot {
    /// Walk the whole tree of `commit`, breadth first.
    pub fn build(
        source: &dyn ObjectSource,
        repo: &Path,
        commit: &CommitInfo,
    ) -> Result<TreeSnapshot> {
        let mut tree = HashMap::new();
        let mut pending = VecDeque::new();
        pending.push_back(("/".to_owned(), commit.tree));

        while let Some((path, id)) = pending.pop_front() {
            let mut dir = DirEntry::default();

            for entry in source.fetch_tree(repo, &id)? {
                match entry.mode {
                    FileMode::Tree => {
                        pending.push_back((join(&path, &entry.name), entry.id));
                        dir.children.push(entry.name);
                    }
                    FileMode::Submodule => {
                        debug!(path = %join(&path, &entry.name), "skipping submodule");
                    }
                    mode => {
                        if let Some(mode) = ObjectMode::from_file_mode(mode) {
                            dir.blobs
                                .insert(entry.name.clone(), BlobEntry::new(mode, entry.id));
                            dir.children.push(entry.name);
                        }
                    }
                }
            }

            tree.insert(path, dir);
        }

        Ok(TreeSnapshot {
            commit_id: commit.id,
            tree_id: commit.tree,
            commit_time: commit.time,
            tree,
        })
    }

    pub fn dir(&self, path: &str) -> Option<&DirEntry> {
        self.tree.get(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.tree.contains_key(path)
    }

    pub fn blob(&self, path: &str) -> Option<&BlobEntry> {
        let (parent, name) = split(path);
        self.tree.get(parent)?.blobs.get(name)
    }
}

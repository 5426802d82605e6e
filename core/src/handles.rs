use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::fs::{FsError, Result};
use crate::lock::ReadWriteLock;

/// Handle ids wrap around before reaching this value.
pub const HANDLE_LIMIT: u64 = 2_147_483_646;

/// Allocates the integer file handles returned by `open`.
///
/// Every handle belongs to one repository, and all of a repository's
/// handles are revoked together when its snapshot is rebuilt. Ids are
/// unique among live handles across all repositories sharing the table.
pub struct FileHandleTable {
    max_handles: usize,
    state: ReadWriteLock<HandleState>,
}

#[derive(Default)]
struct HandleState {
    next: u64,
    live: HashMap<u64, PathBuf>,
    by_repo: HashMap<PathBuf, HashSet<u64>>,
}

impl FileHandleTable {
    pub fn new(max_handles: usize) -> Self {
        FileHandleTable {
            max_handles: max_handles.min(HANDLE_LIMIT as usize),
            state: ReadWriteLock::default(),
        }
    }

    /// Allocate a handle for `repo`, starting after the last one issued.
    pub fn get(&self, repo: &Path) -> Result<u64> {
        let mut state = self.state.write();

        if state.live.len() >= self.max_handles {
            return Err(FsError::TooManyOpenFiles);
        }

        let mut id = state.next;
        while state.live.contains_key(&id) {
            id = (id + 1) % HANDLE_LIMIT;
        }

        state.next = (id + 1) % HANDLE_LIMIT;
        state.live.insert(id, repo.to_owned());
        state
            .by_repo
            .entry(repo.to_owned())
            .or_default()
            .insert(id);

        Ok(id)
    }

    /// Revoke one handle.
    pub fn remove(&self, repo: &Path, id: u64) -> Result<()> {
        let mut state = self.state.write();

        match state.live.get(&id) {
            Some(owner) if owner == repo => (),
            _ => return Err(FsError::BadHandle(id)),
        }

        state.live.remove(&id);
        if let Some(ids) = state.by_repo.get_mut(repo) {
            ids.remove(&id);
            if ids.is_empty() {
                state.by_repo.remove(repo);
            }
        }

        Ok(())
    }

    pub fn is_valid(&self, repo: &Path, id: u64) -> bool {
        let state = self.state.read();
        matches!(state.live.get(&id), Some(owner) if owner == repo)
    }

    /// Revoke every handle belonging to `repo`.
    pub fn remove_all(&self, repo: &Path) {
        let mut state = self.state.write();

        if let Some(ids) = state.by_repo.remove(repo) {
            for id in ids {
                state.live.remove(&id);
            }
        }
    }

    pub fn live_count(&self) -> usize {
        self.state.read().live.len()
    }
}

impl Default for FileHandleTable {
    fn default() -> Self {
        FileHandleTable::new(1024)
    }
}

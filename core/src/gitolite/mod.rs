//! Per-user views of a gitolite-managed set of repositories.
//!
//! The mount shows `/<user>/<repo>/...`, where each user directory holds
//! only the repositories that user may read, plus an optional `.htaccess`
//! file naming the user for a web server in front of the mount.

mod command;
pub use command::GitoliteCommand;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::attr::{FileAttr, NodeKind};
use crate::fs::{self, slice_range, FsError, ReadOnlyFs, Result};
use crate::lock::ReadWriteLock;
use crate::object::{Id, ObjectMode};
use crate::registry::{Dispatch, RepoSet};
use crate::repo::ViewContext;
use crate::source::{self, SourceError};

pub const HTACCESS: &str = ".htaccess";

/// The access-control questions a `GitoliteView` needs answered.
pub trait AccessControl: Send + Sync {
    /// Every user that may be granted access, excluding groups.
    fn list_users(&self) -> source::Result<Vec<String>>;

    /// Names of the physical repositories, without the `.git` suffix.
    fn list_repos(&self) -> source::Result<Vec<String>>;

    /// The subset of `repos` that `user` may read, answered in one call.
    fn accessible_repos(&self, user: &str, repos: &[String]) -> source::Result<Vec<String>>;
}

#[derive(Clone, Debug)]
pub struct GitoliteConfig {
    /// Directory name of the admin repository below the root.
    pub admin_repo: String,

    /// Ref of the admin repository whose movement invalidates access data.
    pub admin_ref: String,

    /// Extra users, one per line, added to those gitolite knows about.
    pub user_list: Option<PathBuf>,

    /// If set, each user directory has a `.htaccess` file with this text
    /// followed by a `Require user` line.
    pub htaccess: Option<String>,
}

impl Default for GitoliteConfig {
    fn default() -> Self {
        GitoliteConfig {
            admin_repo: "gitolite-admin.git".to_owned(),
            admin_ref: "master".to_owned(),
            user_list: None,
            htaccess: None,
        }
    }
}

pub fn htaccess_content(prefix: &str, user: &str) -> String {
    format!("{}Require user {}\n", prefix, user)
}

struct AccessState {
    admin_commit: Option<Id>,
    user_file_mtime: Option<SystemTime>,
    users: Vec<String>,
    repos: Vec<String>,
    per_user: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

enum Route {
    Root,
    User(String),
    Htaccess(String),
    Inside(Dispatch),
}

/// Serves gitolite repositories below `root`, filtered per user.
pub struct GitoliteView {
    root: PathBuf,
    ref_name: String,
    ctx: ViewContext,
    control: Box<dyn AccessControl>,
    config: GitoliteConfig,
    created: SystemTime,
    access: ReadWriteLock<Option<Arc<AccessState>>>,
    repos: ReadWriteLock<RepoSet>,
}

impl GitoliteView {
    pub fn new<P: Into<PathBuf>>(
        root: P,
        ref_name: &str,
        ctx: ViewContext,
        control: Box<dyn AccessControl>,
        config: GitoliteConfig,
    ) -> Self {
        GitoliteView {
            root: root.into(),
            ref_name: ref_name.to_owned(),
            ctx,
            control,
            config,
            created: SystemTime::now(),
            access: ReadWriteLock::new(None),
            repos: ReadWriteLock::default(),
        }
    }

    fn admin_commit(&self) -> Result<Option<Id>> {
        let admin = self.root.join(&self.config.admin_repo);
        match self.ctx.source.resolve_ref(&admin, &self.config.admin_ref) {
            Ok(id) => Ok(Some(id)),
            Err(SourceError::RefNotFound(_)) => {
                warn!(
                    repo = %admin.display(),
                    root_object = %self.config.admin_ref,
                    "gitolite admin repository has no such ref"
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn user_file_mtime(&self) -> Option<SystemTime> {
        let path = self.config.user_list.as_ref()?;
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    fn read_user_file(&self) -> Vec<String> {
        let path = match &self.config.user_list {
            Some(path) => path,
            None => return Vec::new(),
        };

        match std::fs::read_to_string(path) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_owned)
                .collect(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read user list");
                Vec::new()
            }
        }
    }

    /// Return the current access data, recomputing it if the admin
    /// repository or the user list file changed.
    fn state(&self) -> Result<Arc<AccessState>> {
        let admin_commit = self.admin_commit()?;
        let user_file_mtime = self.user_file_mtime();

        let fresh = |state: &Option<Arc<AccessState>>| match state {
            Some(s) if s.admin_commit == admin_commit && s.user_file_mtime == user_file_mtime => {
                Some(s.clone())
            }
            _ => None,
        };

        if let Some(state) = fresh(&*self.access.read()) {
            return Ok(state);
        }

        let mut access = self.access.write();
        if let Some(state) = fresh(&*access) {
            return Ok(state);
        }

        let mut users = self.control.list_users()?;
        for user in self.read_user_file() {
            if !users.contains(&user) {
                users.push(user);
            }
        }

        let repos = self.control.list_repos()?;

        let found: BTreeMap<String, PathBuf> = repos
            .iter()
            .map(|name| (name.clone(), self.root.join(format!("{}.git", name))))
            .collect();
        self.repos.write().update(found, &self.ref_name, &self.ctx);

        info!(
            root = %self.root.display(),
            users = users.len(),
            repos = repos.len(),
            "loaded gitolite access data"
        );

        let state = Arc::new(AccessState {
            admin_commit,
            user_file_mtime,
            users,
            repos,
            per_user: Mutex::new(HashMap::new()),
        });
        *access = Some(state.clone());
        Ok(state)
    }

    /// Users shown at the top level.
    pub fn users(&self) -> Result<Vec<String>> {
        Ok(self.state()?.users.clone())
    }

    /// Repositories `user` may read.
    pub fn repos_for(&self, user: &str) -> Result<Arc<Vec<String>>> {
        let state = self.state()?;
        self.visible(&state, user)
    }

    fn visible(&self, state: &AccessState, user: &str) -> Result<Arc<Vec<String>>> {
        if let Some(repos) = state.per_user.lock().get(user) {
            return Ok(repos.clone());
        }

        let repos = Arc::new(self.control.accessible_repos(user, &state.repos)?);
        state
            .per_user
            .lock()
            .insert(user.to_owned(), repos.clone());
        Ok(repos)
    }

    fn route(&self, path: &str) -> Result<Route> {
        let path = fs::normalize(path);
        if path == "/" {
            return Ok(Route::Root);
        }

        let state = self.state()?;
        let rel = &path[1..];
        let (user, rest) = match rel.find('/') {
            Some(n) => (&rel[..n], &rel[n..]),
            None => (rel, ""),
        };

        if !state.users.iter().any(|u| u == user) {
            return Err(FsError::NotFound(path.clone()));
        }

        if rest.is_empty() {
            return Ok(Route::User(user.to_owned()));
        }

        if rest == format!("/{}", HTACCESS) && self.config.htaccess.is_some() {
            return Ok(Route::Htaccess(user.to_owned()));
        }

        let visible = self.visible(&state, user)?;
        let dispatch = self
            .repos
            .read()
            .dispatch_filtered(rest, |name| visible.iter().any(|v| v == name));
        Ok(Route::Inside(dispatch))
    }

    fn htaccess(&self, user: &str) -> Vec<u8> {
        let prefix = self.config.htaccess.as_deref().unwrap_or("");
        htaccess_content(prefix, user).into_bytes()
    }

    fn synthetic_dir(&self) -> FileAttr {
        FileAttr::directory(&self.ctx.config.modes, self.created)
    }

    fn handle_owner(&self) -> &Path {
        &self.root
    }
}

impl ReadOnlyFs for GitoliteView {
    fn getattr(&self, path: &str) -> Result<FileAttr> {
        match self.route(path)? {
            Route::Root | Route::User(_) => Ok(self.synthetic_dir()),
            Route::Htaccess(user) => Ok(FileAttr::blob(
                &self.ctx.config.modes,
                ObjectMode::RegularFile,
                self.htaccess(&user).len() as u64,
                self.created,
            )),
            Route::Inside(Dispatch::Repo(view, rel)) => view.getattr(&rel),
            Route::Inside(Dispatch::Intermediate(_)) => Ok(self.synthetic_dir()),
            Route::Inside(Dispatch::NotFound) => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        match self.route(path)? {
            Route::Root => self.users(),
            Route::User(user) => {
                let visible = self.repos_for(&user)?;
                let mut names = match self
                    .repos
                    .read()
                    .dispatch_filtered("/", |name| visible.iter().any(|v| v == name))
                {
                    Dispatch::Intermediate(children) => children,
                    _ => Vec::new(),
                };

                if self.config.htaccess.is_some() {
                    names.push(HTACCESS.to_owned());
                }
                Ok(names)
            }
            Route::Inside(Dispatch::Repo(view, rel)) => view.readdir(&rel),
            Route::Inside(Dispatch::Intermediate(children)) => Ok(children),
            Route::Htaccess(_) | Route::Inside(Dispatch::NotFound) => {
                Err(FsError::NotFound(path.to_owned()))
            }
        }
    }

    fn readdir_kinds(&self, path: &str) -> Result<Vec<(String, NodeKind)>> {
        match self.route(path)? {
            Route::Inside(Dispatch::Repo(view, rel)) => view.readdir_kinds(&rel),
            Route::User(_) => Ok(self
                .readdir(path)?
                .into_iter()
                .map(|name| {
                    let kind = if name == HTACCESS {
                        NodeKind::RegularFile
                    } else {
                        NodeKind::Directory
                    };
                    (name, kind)
                })
                .collect()),
            _ => Ok(fs::directories(self.readdir(path)?)),
        }
    }

    fn readlink(&self, path: &str) -> Result<Vec<u8>> {
        match self.route(path)? {
            Route::Inside(Dispatch::Repo(view, rel)) => view.readlink(&rel),
            _ => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn open(&self, path: &str, flags: i32) -> Result<u64> {
        if fs::wants_write(flags) {
            return Err(FsError::ReadOnly);
        }

        match self.route(path)? {
            Route::Htaccess(_) => self.ctx.handles.get(self.handle_owner()),
            Route::Inside(Dispatch::Repo(view, rel)) => view.open(&rel, flags),
            _ => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn read(&self, path: &str, size: usize, offset: u64, fh: u64) -> Result<Vec<u8>> {
        match self.route(path)? {
            Route::Htaccess(user) => {
                if !self.ctx.handles.is_valid(self.handle_owner(), fh) {
                    return Err(FsError::BadHandle(fh));
                }
                Ok(slice_range(&self.htaccess(&user), size, offset))
            }
            Route::Inside(Dispatch::Repo(view, rel)) => view.read(&rel, size, offset, fh),
            _ => Err(FsError::NotFound(path.to_owned())),
        }
    }

    fn release(&self, path: &str, fh: u64) -> Result<()> {
        match self.route(path)? {
            Route::Htaccess(_) => self.ctx.handles.remove(self.handle_owner(), fh),
            Route::Inside(Dispatch::Repo(view, rel)) => view.release(&rel, fh),
            _ => Err(FsError::BadHandle(fh)),
        }
    }
}

#[cfg(test)]
mod tests;

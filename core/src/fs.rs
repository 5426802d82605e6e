//! The filesystem-facing surface shared by every kind of mounted view.

use thiserror::Error;

use crate::attr::{FileAttr, NodeKind};
use crate::source::SourceError;

/// Describes the ways a filesystem call on a view can fail.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("{0}: no such file or directory")]
    NotFound(String),

    #[error("{0}: is a directory")]
    IsDir(String),

    #[error("bad file handle {0}")]
    BadHandle(u64),

    #[error("too many open files")]
    TooManyOpenFiles,

    #[error("read-only file system")]
    ReadOnly,

    #[error(transparent)]
    Backend(#[from] SourceError),
}

impl FsError {
    /// The `errno` value a kernel caller should see for this error.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::IsDir(_) => libc::EISDIR,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::TooManyOpenFiles => libc::EMFILE,
            FsError::ReadOnly => libc::EROFS,
            FsError::Backend(_) => libc::EIO,
        }
    }
}

/// A specialized `Result` type for filesystem calls.
pub type Result<T> = std::result::Result<T, FsError>;

/// The read-only subset of filesystem calls a mounted view answers.
///
/// Paths are absolute within the view (`/` is the view's root) and are
/// normalized by the implementation, so `"/a//b/"` and `"/a/b"` agree.
pub trait ReadOnlyFs: Send + Sync {
    fn getattr(&self, path: &str) -> Result<FileAttr>;

    /// List the names in a directory, without `.` and `..`.
    fn readdir(&self, path: &str) -> Result<Vec<String>>;

    /// List a directory together with the kind of each entry.
    ///
    /// The default asks `getattr` about every name and leaves out those it
    /// cannot answer for. Views that already know the kinds override it.
    fn readdir_kinds(&self, path: &str) -> Result<Vec<(String, NodeKind)>> {
        let path = normalize(path);
        Ok(self
            .readdir(&path)?
            .into_iter()
            .filter_map(|name| {
                let kind = self.getattr(&join(&path, &name)).ok()?.kind;
                Some((name, kind))
            })
            .collect())
    }

    fn readlink(&self, path: &str) -> Result<Vec<u8>>;

    /// Allocate a file handle. `flags` are the `open(2)` flags; any access
    /// mode other than `O_RDONLY` is refused with [`FsError::ReadOnly`].
    ///
    /// [`FsError::ReadOnly`]: enum.FsError.html#variant.ReadOnly
    fn open(&self, path: &str, flags: i32) -> Result<u64>;

    fn read(&self, path: &str, size: usize, offset: u64, fh: u64) -> Result<Vec<u8>>;

    fn release(&self, path: &str, fh: u64) -> Result<()>;
}

/// True if `flags` ask for anything other than read access.
pub fn wants_write(flags: i32) -> bool {
    flags & libc::O_ACCMODE != libc::O_RDONLY
        || flags & (libc::O_TRUNC | libc::O_APPEND | libc::O_CREAT) != 0
}

/// Normalize a view path: one leading `/`, no empty or `.` components,
/// no trailing `/` (except for the root itself).
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
        out.push('/');
        out.push_str(part);
    }

    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Split a normalized path into its parent directory and final name.
/// The root splits into `("/", "")`.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(n) => (&path[..n], &path[n + 1..]),
        None => ("/", path),
    }
}

/// Join a normalized directory path and a name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Pair every name with [`NodeKind::Directory`].
///
/// [`NodeKind::Directory`]: ../attr/enum.NodeKind.html#variant.Directory
pub fn directories(names: Vec<String>) -> Vec<(String, NodeKind)> {
    names
        .into_iter()
        .map(|name| (name, NodeKind::Directory))
        .collect()
}

/// Take a byte range out of a blob, clamped to its length.
pub fn slice_range(bytes: &[u8], size: usize, offset: u64) -> Vec<u8> {
    let len = bytes.len() as u64;
    let start = offset.min(len) as usize;
    let end = (offset.saturating_add(size as u64)).min(len) as usize;
    bytes[start..end].to_vec()
}

//! The FUSE adapter: translates inode-based kernel requests into the
//! path-based `ReadOnlyFs` calls the views answer.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use gitbarefs_core::attr::{self, NodeKind};
use gitbarefs_core::fs::{self as vfs, FsError, ReadOnlyFs};
use parking_lot::Mutex;
use tracing::{debug, trace};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;
const BLOCK_SIZE: u32 = 512;

/// Options for mounting a view.
#[derive(Clone, Debug, Default)]
pub(crate) struct MountConfig {
    pub allow_other: bool,
    pub daemon: bool,
}

/// Stable inode numbers for the paths the kernel has looked up.
///
/// An inode lives until the kernel forgets every lookup of it. Inodes
/// handed out in directory listings carry no lookups of their own.
#[derive(Debug)]
pub(crate) struct Inodes {
    paths: HashMap<u64, String>,
    inos: HashMap<String, u64>,
    lookups: HashMap<u64, u64>,
    next: u64,
}

impl Default for Inodes {
    fn default() -> Self {
        let mut inodes = Inodes {
            paths: HashMap::new(),
            inos: HashMap::new(),
            lookups: HashMap::new(),
            next: ROOT_INO + 1,
        };
        inodes.paths.insert(ROOT_INO, "/".to_owned());
        inodes.inos.insert("/".to_owned(), ROOT_INO);
        inodes
    }
}

impl Inodes {
    pub(crate) fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    pub(crate) fn ino(&mut self, path: &str) -> u64 {
        if let Some(ino) = self.inos.get(path) {
            return *ino;
        }

        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_owned());
        self.inos.insert(path.to_owned(), ino);
        ino
    }

    /// Path of `name` inside the directory `parent`. No inode is allocated.
    pub(crate) fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let name = name.to_str()?;
        Some(vfs::join(self.path(parent)?, name))
    }

    /// Inode for a path the kernel has successfully looked up.
    pub(crate) fn lookup(&mut self, path: &str) -> u64 {
        let ino = self.ino(path);
        *self.lookups.entry(ino).or_insert(0) += 1;
        ino
    }

    pub(crate) fn forget(&mut self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }

        let remaining = match self.lookups.get_mut(&ino) {
            Some(count) => {
                *count = count.saturating_sub(nlookup);
                *count
            }
            None => 0,
        };

        if remaining == 0 {
            self.lookups.remove(&ino);
            if let Some(path) = self.paths.remove(&ino) {
                self.inos.remove(&path);
            }
        }
    }

    pub(crate) fn parent(&mut self, ino: u64) -> u64 {
        match self.path(ino).map(|p| vfs::split(p).0.to_owned()) {
            Some(parent) if ino != ROOT_INO => self.ino(&parent),
            _ => ROOT_INO,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.paths.len()
    }
}

/// A `fuser::Filesystem` over any `ReadOnlyFs`.
pub(crate) struct GitBareFs {
    fs: Arc<dyn ReadOnlyFs>,
    inodes: Mutex<Inodes>,
    uid: u32,
    gid: u32,
}

impl GitBareFs {
    pub(crate) fn new(fs: Arc<dyn ReadOnlyFs>) -> Self {
        GitBareFs {
            fs,
            inodes: Mutex::new(Inodes::default()),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn path(&self, ino: u64) -> Result<String, FsError> {
        self.inodes
            .lock()
            .path(ino)
            .map(str::to_owned)
            .ok_or_else(|| FsError::NotFound(format!("inode {}", ino)))
    }

    /// The path behind `ino`, or the errno to reply with.
    fn path_for(&self, op: &str, ino: u64) -> Result<String, i32> {
        self.path(ino)
            .map_err(|err| errno(op, &format!("inode {}", ino), &err))
    }

    fn attr(&self, ino: u64, path: &str) -> Result<FileAttr, FsError> {
        Ok(to_fuse_attr(ino, &self.fs.getattr(path)?, self.uid, self.gid))
    }

    /// Attributes for a lookup of `path`. The inode is allocated only once
    /// the path is known to exist.
    fn entry(&self, path: &str) -> Result<FileAttr, FsError> {
        let attr = self.fs.getattr(path)?;
        let ino = self.inodes.lock().lookup(path);
        Ok(to_fuse_attr(ino, &attr, self.uid, self.gid))
    }

    fn list(&self, ino: u64, path: &str) -> Result<Vec<(u64, FileType, String)>, FsError> {
        let children = self.fs.readdir_kinds(path)?;

        let mut inodes = self.inodes.lock();
        let mut entries = vec![
            (ino, FileType::Directory, ".".to_owned()),
            (inodes.parent(ino), FileType::Directory, "..".to_owned()),
        ];

        for (name, kind) in children {
            let child = inodes.ino(&vfs::join(path, &name));
            entries.push((child, file_type(kind), name));
        }

        Ok(entries)
    }
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::RegularFile => FileType::RegularFile,
        NodeKind::Symlink => FileType::Symlink,
    }
}

pub(crate) fn to_fuse_attr(ino: u64, attr: &attr::FileAttr, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: (attr.size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64,
        atime: attr.time,
        mtime: attr.time,
        ctime: attr.time,
        crtime: attr.time,
        kind: file_type(attr.kind),
        perm: (attr.mode & 0o7777) as u16,
        nlink: if attr.is_dir() { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

fn errno(op: &str, path: &str, err: &FsError) -> i32 {
    match err {
        FsError::Backend(_) => debug!(op, path, error = %err, "backend failure"),
        _ => trace!(op, path, error = %err, "request failed"),
    }
    err.errno()
}

impl Filesystem for GitBareFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.inodes.lock().child_path(parent, name) {
            Some(path) => path,
            None => return reply.error(libc::ENOENT),
        };

        match self.entry(&path) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(errno("lookup", &path, &err)),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        self.inodes.lock().forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = match self.path_for("getattr", ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };

        match self.attr(ino, &path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(errno("getattr", &path, &err)),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let path = match self.path_for("readlink", ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };

        match self.fs.readlink(&path) {
            Ok(target) => reply.data(&target),
            Err(err) => reply.error(errno("readlink", &path, &err)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path_for("open", ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };

        match self.fs.open(&path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(err) => reply.error(errno("open", &path, &err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            return reply.error(libc::EINVAL);
        }

        let path = match self.path_for("read", ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };

        match self.fs.read(&path, size as usize, offset as u64, fh) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(errno("read", &path, &err)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = match self.path_for("release", ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };

        match self.fs.release(&path, fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno("release", &path, &err)),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path_for("readdir", ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };

        let entries = match self.list(ino, &path) {
            Ok(entries) => entries,
            Err(err) => return reply.error(errno("readdir", &path, &err)),
        };

        for (i, (ino, kind, name)) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }

        reply.ok();
    }

    fn setattr(
        &mut self,
        _req: &Request,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(libc::EROFS);
    }

    fn mknod(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn unlink(&mut self, _req: &Request, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn rmdir(&mut self, _req: &Request, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn symlink(
        &mut self,
        _req: &Request,
        _parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn rename(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn link(
        &mut self,
        _req: &Request,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        reply.error(libc::EROFS);
    }

    fn create(
        &mut self,
        _req: &Request,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(libc::EROFS);
    }
}

/// Mount `fs` at `target` and serve requests until it is unmounted.
pub(crate) fn mount(fs: Arc<dyn ReadOnlyFs>, target: &Path, config: &MountConfig) -> io::Result<()> {
    let mut options = vec![
        MountOption::RO,
        MountOption::FSName("gitbarefs".to_owned()),
        MountOption::Subtype("gitbarefs".to_owned()),
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }

    if config.daemon && unsafe { libc::daemon(1, 0) } != 0 {
        return Err(io::Error::last_os_error());
    }

    debug!(target = %target.display(), ?options, "mounting");
    fuser::mount2(GitBareFs::new(fs), target, &options)
}

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::object::{ModeTable, ObjectMode};

/// Size reported for every directory, as ext4 would.
pub const DIRECTORY_SIZE: u64 = 4096;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeKind {
    Directory,
    RegularFile,
    Symlink,
}

/// Attributes of a node in a mounted view. Owner and group are filled in
/// by the filesystem adapter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FileAttr {
    pub kind: NodeKind,

    /// Full `st_mode`, file type bits included.
    pub mode: u32,

    pub size: u64,

    /// Used for access, modification and change times alike.
    pub time: SystemTime,
}

impl FileAttr {
    pub fn directory(modes: &ModeTable, time: SystemTime) -> Self {
        FileAttr {
            kind: NodeKind::Directory,
            mode: modes.directory,
            size: DIRECTORY_SIZE,
            time,
        }
    }

    pub fn blob(modes: &ModeTable, mode: ObjectMode, size: u64, time: SystemTime) -> Self {
        FileAttr {
            kind: match mode {
                ObjectMode::Symlink => NodeKind::Symlink,
                _ => NodeKind::RegularFile,
            },
            mode: modes.st_mode(mode),
            size,
            time,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// Convert a git timestamp (seconds since the epoch) to a `SystemTime`.
pub fn commit_time(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs())
    }
}

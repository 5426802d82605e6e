use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use gitbarefs_core::object::{Id, Kind};
use gitbarefs_core::source::{Result, SourceError};
use tracing::debug;

use crate::{loose, pack::Pack};

/// The object database of one git directory: loose objects plus the
/// packs that were present when it was opened.
#[derive(Debug)]
pub(crate) struct Odb {
    git_dir: PathBuf,
    packs: Vec<Pack>,
    pack_dir_mtime: Option<SystemTime>,
}

impl Odb {
    pub(crate) fn open(git_dir: &Path) -> Result<Odb> {
        let pack_dir = pack_dir(git_dir);
        let pack_dir_mtime = mtime(&pack_dir);
        let mut packs = Vec::new();

        if pack_dir_mtime.is_some() {
            for entry in fs::read_dir(&pack_dir)? {
                let path = entry?.path();
                if path.extension().map_or(false, |ext| ext == "idx") {
                    packs.push(Pack::open(&path)?);
                }
            }
        }

        debug!(
            git_dir = %git_dir.display(),
            packs = packs.len(),
            packed_objects = packs.iter().map(Pack::len).sum::<usize>(),
            "opened object database"
        );

        Ok(Odb {
            git_dir: git_dir.to_path_buf(),
            packs,
            pack_dir_mtime,
        })
    }

    /// True while the set of packs on disk matches what was loaded.
    pub(crate) fn is_current(&self) -> bool {
        mtime(&pack_dir(&self.git_dir)) == self.pack_dir_mtime
    }

    pub(crate) fn read(&self, id: &Id) -> Result<(Kind, Vec<u8>)> {
        if let Some(object) = loose::read(&self.git_dir, id)? {
            return Ok(object);
        }

        for pack in &self.packs {
            if let Some(offset) = pack.find(id) {
                return pack.read_at(offset, &|base: &Id| self.read(base));
            }
        }

        Err(SourceError::ObjectNotFound(*id))
    }

    pub(crate) fn header(&self, id: &Id) -> Result<(Kind, u64)> {
        if let Some(header) = loose::read_header(&self.git_dir, id)? {
            return Ok(header);
        }

        for pack in &self.packs {
            if let Some(offset) = pack.find(id) {
                return pack.header_at(offset, &|base: &Id| self.header(base));
            }
        }

        Err(SourceError::ObjectNotFound(*id))
    }

    /// Read an object that must be of kind `kind`.
    ///
    /// An object of another kind is reported as not found, the same way
    /// `git cat-file <kind> <id>` refuses it.
    pub(crate) fn read_kind(&self, id: &Id, kind: Kind) -> Result<Vec<u8>> {
        match self.read(id)? {
            (found, data) if found == kind => Ok(data),
            _ => Err(SourceError::ObjectNotFound(*id)),
        }
    }
}

fn pack_dir(git_dir: &Path) -> PathBuf {
    git_dir.join("objects").join("pack")
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_objects() {
        let dir = tempfile::tempdir().unwrap();
        let id = loose::write(dir.path(), Kind::Blob, b"abc\n");

        let odb = Odb::open(dir.path()).unwrap();
        assert_eq!(odb.read(&id).unwrap(), (Kind::Blob, b"abc\n".to_vec()));
        assert_eq!(odb.header(&id).unwrap(), (Kind::Blob, 4));
        assert_eq!(odb.read_kind(&id, Kind::Blob).unwrap(), b"abc\n");
    }

    #[test]
    fn wrong_kind_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let id = loose::write(dir.path(), Kind::Blob, b"abc\n");

        let odb = Odb::open(dir.path()).unwrap();
        let err = odb.read_kind(&id, Kind::Tree).unwrap_err();
        assert!(matches!(err, SourceError::ObjectNotFound(x) if x == id));
    }

    #[test]
    fn missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let odb = Odb::open(dir.path()).unwrap();
        let id = loose::object_id(Kind::Blob, b"nope");

        assert!(matches!(odb.read(&id), Err(SourceError::ObjectNotFound(_))));
        assert!(matches!(odb.header(&id), Err(SourceError::ObjectNotFound(_))));
    }

    #[test]
    fn notices_new_pack_dir() {
        let dir = tempfile::tempdir().unwrap();
        let odb = Odb::open(dir.path()).unwrap();
        assert!(odb.is_current());

        fs::create_dir_all(pack_dir(dir.path())).unwrap();
        assert!(!odb.is_current());
    }
}

//! Resolution of git-annex pointers: symlinks whose target lives in the
//! annex object store rather than in git.

use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::bytes::Regex;

use crate::attr::{FileAttr, NodeKind};
use crate::object::{ModeTable, ObjectMode};

fn annex_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|/)annex/objects/(?:[^/]+/)*([^/]+)$").expect("annex pattern is valid")
    })
}

/// An annexed file found on local disk.
#[derive(Debug)]
pub struct AnnexFile {
    pub path: PathBuf,
    pub metadata: Metadata,
}

impl AnnexFile {
    /// Attributes to report in place of the pointer symlink's.
    pub fn attr(&self, modes: &ModeTable, fallback_time: std::time::SystemTime) -> FileAttr {
        let executable = self.metadata.permissions().mode() & 0o111 != 0;
        let mode = if executable {
            ObjectMode::ExecutableFile
        } else {
            ObjectMode::RegularFile
        };

        FileAttr {
            kind: NodeKind::RegularFile,
            mode: modes.st_mode(mode),
            size: self.metadata.len(),
            time: self.metadata.modified().unwrap_or(fallback_time),
        }
    }

    pub fn read_range(&self, size: usize, offset: u64) -> io::Result<Vec<u8>> {
        let mut f = File::open(&self.path)?;
        f.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::with_capacity(size.min(self.metadata.len() as usize));
        f.take(size as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Return the annex key named by a symlink target, if the target points
/// into an annex object store.
pub fn annex_key(target: &[u8]) -> Option<&[u8]> {
    annex_pattern()
        .captures(target)
        .and_then(|c| c.get(1))
        .map(|m| m.as_bytes())
}

/// Look for the content behind an annex pointer.
///
/// `repo` is the repository root and `link_dir` the view path of the
/// directory holding the symlink. Two locations are tried: the hashed
/// object directory used by bare repositories, then the symlink target
/// taken relative to the symlink in a working copy. Only regular files
/// inside this repository's own annex object store count; anything else
/// means the pointer is left as a plain symlink.
pub fn resolve(repo: &Path, link_dir: &str, target: &[u8]) -> Option<AnnexFile> {
    let key = annex_key(target)?;
    let key = std::str::from_utf8(key).ok()?;
    if key == "." || key == ".." {
        return None;
    }

    let git_dir = git_dir(repo);
    let store = std::fs::canonicalize(git_dir.join("annex/objects")).ok()?;

    candidates(repo, &git_dir, link_dir, key, target)
        .into_iter()
        .find_map(|path| {
            let path = std::fs::canonicalize(path).ok()?;
            if !path.starts_with(&store) {
                return None;
            }

            match std::fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => Some(AnnexFile { path, metadata }),
                _ => None,
            }
        })
}

fn git_dir(repo: &Path) -> PathBuf {
    if repo.join(".git").is_dir() {
        repo.join(".git")
    } else {
        repo.to_owned()
    }
}

fn candidates(
    repo: &Path,
    git_dir: &Path,
    link_dir: &str,
    key: &str,
    target: &[u8],
) -> Vec<PathBuf> {
    let hash = format!("{:x}", md5::compute(key.as_bytes()));
    let mut paths = vec![git_dir
        .join("annex/objects")
        .join(&hash[0..3])
        .join(&hash[3..6])
        .join(key)
        .join(key)];

    if let Ok(target) = std::str::from_utf8(target) {
        if !target.starts_with('/') {
            paths.push(
                repo.join(link_dir.trim_start_matches('/'))
                    .join(target),
            );
        }
    }

    paths
}

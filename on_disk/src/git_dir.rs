use std::fs;
use std::path::{Path, PathBuf};

use gitbarefs_core::source::{Result, SourceError};

/// Locate the git directory of the repository rooted at `repo`.
///
/// Accepts a working copy with a `.git` directory, a working copy whose
/// `.git` file points elsewhere (`gitdir: <path>`), or a bare repository.
pub fn find_git_dir(repo: &Path) -> Result<PathBuf> {
    let dot_git = repo.join(".git");

    if dot_git.is_dir() {
        return Ok(dot_git);
    }

    if dot_git.is_file() {
        let content = fs::read_to_string(&dot_git)?;
        if let Some(target) = content.trim_end().strip_prefix("gitdir: ") {
            let target = Path::new(target);
            let git_dir = if target.is_absolute() {
                target.to_path_buf()
            } else {
                repo.join(target)
            };

            if looks_like_git_dir(&git_dir) {
                return Ok(git_dir);
            }
        }

        return Err(SourceError::RepoNotFound(repo.to_path_buf()));
    }

    if looks_like_git_dir(repo) {
        Ok(repo.to_path_buf())
    } else {
        Err(SourceError::RepoNotFound(repo.to_path_buf()))
    }
}

fn looks_like_git_dir(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir()
}

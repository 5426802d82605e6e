use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};

use gitbarefs_core::object::{parse_commit, parse_tree, CommitInfo, Id, TreeEntry};
use gitbarefs_core::source::{run_with_timeout, ObjectSource, Result, SourceConfig, SourceError};
use tracing::trace;

use crate::find_git_dir;

/// Implementation of `ObjectSource` that asks the command-line `git`
/// for everything, one `git cat-file` process per call.
#[derive(Clone, Debug, Default)]
pub struct GitCommandSource {
    config: SourceConfig,
}

impl GitCommandSource {
    pub fn new(config: SourceConfig) -> GitCommandSource {
        GitCommandSource { config }
    }

    fn git<I, S>(&self, repo: &Path, args: I, input: Option<Vec<u8>>) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let git_dir = find_git_dir(repo)?;

        let mut command = Command::new(&self.config.git);
        command
            .env_remove("GIT_DIR")
            .env_remove("GIT_OBJECT_DIRECTORY")
            .arg("--git-dir")
            .arg(&git_dir)
            .args(args);

        trace!(?command, "running git");

        run_with_timeout(command, input, self.config.timeout)
    }

    fn cat_file(&self, repo: &Path, kind: &str, id: &Id) -> Result<Vec<u8>> {
        let hex = id.to_string();
        let output = self.git(repo, &["cat-file", kind, hex.as_str()], None)?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(failure(&output, Some(id)))
        }
    }

    fn batch_check(&self, repo: &Path, format: &str, query: String) -> Result<String> {
        let arg = format!("--batch-check={}", format);
        let output = self.git(repo, &["cat-file", arg.as_str()], Some(query.into_bytes()))?;

        if !output.status.success() {
            return Err(failure(&output, None));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_owned())
    }
}

fn failure(output: &Output, id: Option<&Id>) -> SourceError {
    let stderr = String::from_utf8_lossy(&output.stderr);

    if let Some(id) = id {
        if stderr.contains("Not a valid object name") || stderr.contains("bad file") {
            return SourceError::ObjectNotFound(*id);
        }
    }

    SourceError::Command(format!(
        "git exited with {}: {}",
        output.status,
        stderr.trim()
    ))
}

// `batch-check` reports unknown names on stdout instead of failing.
fn is_missing(line: &str) -> bool {
    line.is_empty() || line.ends_with(" missing") || line.ends_with(" ambiguous")
}

impl ObjectSource for GitCommandSource {
    fn resolve_ref(&self, repo: &Path, name: &str) -> Result<Id> {
        if name.contains('\n') {
            return Err(SourceError::RefNotFound(name.to_owned()));
        }

        let line = self.batch_check(repo, "%(objectname)", format!("{}^{{commit}}\n", name))?;

        if is_missing(&line) {
            return Err(SourceError::RefNotFound(name.to_owned()));
        }

        Id::from_hex(&line).map_err(|_| {
            SourceError::Command(format!("unexpected git cat-file output: {}", line))
        })
    }

    fn read_commit(&self, repo: &Path, id: &Id) -> Result<CommitInfo> {
        let data = self.cat_file(repo, "commit", id)?;
        Ok(parse_commit(*id, &data)?)
    }

    fn fetch_tree(&self, repo: &Path, id: &Id) -> Result<Vec<TreeEntry>> {
        let data = self.cat_file(repo, "tree", id)?;
        Ok(parse_tree(&data)?)
    }

    fn fetch_blob(&self, repo: &Path, id: &Id) -> Result<Vec<u8>> {
        self.cat_file(repo, "blob", id)
    }

    fn blob_size(&self, repo: &Path, id: &Id) -> Result<u64> {
        let line = self.batch_check(repo, "%(objecttype) %(objectsize)", format!("{}\n", id))?;

        match line.split_once(' ') {
            Some(("blob", size)) if !is_missing(&line) => size.parse().map_err(|_| {
                SourceError::Command(format!("unexpected git cat-file output: {}", line))
            }),
            _ => Err(SourceError::ObjectNotFound(*id)),
        }
    }
}

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::debug;

use super::AccessControl;
use crate::source::{run_with_timeout, Result, SourceError};

const ADMIN_REPO: &str = "gitolite-admin";

/// Asks the `gitolite` command-line tool who may read what.
pub struct GitoliteCommand {
    program: PathBuf,
    cwd: PathBuf,
    timeout: Duration,
}

impl GitoliteCommand {
    /// `cwd` is where the tool runs; usually the admin repository.
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(program: P, cwd: Q, timeout: Duration) -> Self {
        GitoliteCommand {
            program: program.into(),
            cwd: cwd.into(),
            timeout,
        }
    }

    fn run(&self, args: &[&str], input: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(&self.cwd);

        let output = run_with_timeout(cmd, input, self.timeout)?;
        if !output.status.success() {
            return Err(SourceError::Command(format!(
                "gitolite {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output.stdout)
    }
}

fn lines(output: &[u8]) -> impl Iterator<Item = String> + '_ {
    output
        .split(|b| *b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim().to_owned())
        .filter(|line| !line.is_empty())
}

impl AccessControl for GitoliteCommand {
    fn list_users(&self) -> Result<Vec<String>> {
        let output = self.run(&["list-users"], None)?;
        Ok(lines(&output)
            .filter(|user| user != "admin" && !user.starts_with('@'))
            .collect())
    }

    fn list_repos(&self) -> Result<Vec<String>> {
        let output = self.run(&["list-phy-repos"], None)?;
        Ok(lines(&output).filter(|repo| repo != ADMIN_REPO).collect())
    }

    fn accessible_repos(&self, user: &str, repos: &[String]) -> Result<Vec<String>> {
        if repos.is_empty() {
            return Ok(Vec::new());
        }

        let mut input = repos.join("\n").into_bytes();
        input.push(b'\n');

        // One call answers for every repository: `%` reads names from stdin
        // and prints one result line per name.
        let output = self.run(&["access", "%", user, "R", "any"], Some(input))?;

        let allowed: Vec<String> = lines(&output)
            .filter(|line| !line.contains("DENIED"))
            .filter_map(|line| line.split('\t').next().map(str::to_owned))
            .filter(|repo| repos.contains(repo))
            .collect();

        debug!(user, allowed = allowed.len(), of = repos.len(), "gitolite access");
        Ok(allowed)
    }
}

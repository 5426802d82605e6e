use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

/// A `TempGitRepo` creates a bare repository plus a working clone of it
/// using the command-line git from the host system. Content is committed
/// in the clone and pushed to the bare repository, which is what the
/// filesystem views are pointed at.
///
/// Because this struct is intended for testing, its functions
/// panic instead of returning Result structs.
pub struct TempGitRepo {
    #[allow(dead_code)] // tempdir is only used for RAII
    tempdir: Option<tempfile::TempDir>,

    #[allow(dead_code)] // work_tempdir is only used for RAII
    work_tempdir: tempfile::TempDir,

    bare: PathBuf,
    work: PathBuf,
}

impl TempGitRepo {
    // Create a new, empty bare repo in a temporary directory.
    // This directory will be deleted when the struct is dropped.
    pub fn new() -> TempGitRepo {
        let tempdir = tempfile::tempdir().unwrap();
        let bare = tempdir.path().join("repo1");

        TempGitRepo::create(Some(tempdir), bare)
    }

    // Create a new, empty bare repo at the specified location.
    // WARNING: This will erase any content already at that path.
    // The bare repo is left behind when the struct is dropped, so this
    // is also how several repos are placed under one registry root.
    pub fn new_at_path<P: Into<PathBuf>>(p: P) -> TempGitRepo {
        let bare = p.into();
        fs::remove_dir_all(&bare).unwrap_or(());

        TempGitRepo::create(None, bare)
    }

    // Create a repo holding the usual fixture tree:
    //
    // ```
    // a      "a\n"
    // b      "b\n"
    // l  ->  a
    // d/c    "abc\n"
    // ```
    pub fn with_simple_tree() -> TempGitRepo {
        let mut r = TempGitRepo::new();
        r.write_simple_tree();
        r
    }

    fn create(tempdir: Option<tempfile::TempDir>, bare: PathBuf) -> TempGitRepo {
        fs::create_dir_all(&bare).unwrap();

        let work_tempdir = tempfile::tempdir().unwrap();
        let work = work_tempdir.path().join("client");

        let mut r = TempGitRepo {
            tempdir,
            work_tempdir,
            bare,
            work,
        };

        r.init();
        r
    }

    fn init(&mut self) {
        self.bare_git_command(&["init", "--bare", "--quiet"]);
        self.bare_git_command(&["symbolic-ref", "HEAD", "refs/heads/master"]);

        let bare = self.bare.to_string_lossy().into_owned();
        let work = self.work.to_string_lossy().into_owned();
        let output = Command::new("git")
            .args(&["clone", "--quiet", bare.as_str(), work.as_str()])
            .output()
            .unwrap();
        check_output("clone", &output);

        self.git_command(&["symbolic-ref", "HEAD", "refs/heads/master"])
            .git_command(&["config", "user.name", "Test User"])
            .git_command(&["config", "user.email", "test@example.com"])
            .git_command(&["config", "commit.gpgsign", "false"])
            .git_command(&["config", "core.autocrlf", "false"]);
    }

    // Return the path of the bare repository.
    pub fn path(&self) -> &Path {
        self.bare.as_path()
    }

    // Return the path of the working clone.
    pub fn work_path(&self) -> &Path {
        self.work.as_path()
    }

    // Create a command struct pointing to the root of the working clone.
    pub fn command<S: AsRef<OsStr>>(&mut self, program: S) -> Command {
        let mut c = Command::new(program);
        c.current_dir(&self.work);
        c
    }

    // Run a git command in the working clone and return the git repo
    // struct for method chaining.
    // Since this is used primarily for testing purposes, panics if command fails.
    pub fn git_command<I, S>(&mut self, args: I) -> &mut TempGitRepo
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.command("git").args(args).output().unwrap();
        check_output("git", &output);
        self
    }

    // Run a git command inside the bare repository.
    pub fn bare_git_command<I, S>(&mut self, args: I) -> &mut TempGitRepo
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new("git")
            .current_dir(&self.bare)
            .args(args)
            .output()
            .unwrap();
        check_output("git", &output);
        self
    }

    // Run a git command in the working clone and return its trimmed stdout.
    pub fn git_output<I, S>(&mut self, args: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.command("git").args(args).output().unwrap();
        check_output("git", &output);
        String::from_utf8(output.stdout).unwrap().trim().to_owned()
    }

    // Write a file (and any missing parent directories) in the working clone.
    pub fn write_file<P: AsRef<Path>, C: AsRef<[u8]>>(&mut self, path: P, content: C) -> &mut TempGitRepo {
        let path = self.work.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        self
    }

    // Create a symbolic link in the working clone.
    pub fn symlink<P: AsRef<Path>, Q: AsRef<Path>>(&mut self, target: P, link: Q) -> &mut TempGitRepo {
        std::os::unix::fs::symlink(target, self.work.join(link)).unwrap();
        self
    }

    // Mark a file in the working clone as executable.
    pub fn make_executable<P: AsRef<Path>>(&mut self, path: P) -> &mut TempGitRepo {
        use std::os::unix::fs::PermissionsExt;

        let path = self.work.join(path);
        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&path, permissions).unwrap();
        self
    }

    // Stage everything, commit, and push `master` to the bare repository.
    pub fn commit_and_push(&mut self, message: &str) -> &mut TempGitRepo {
        self.git_command(&["add", "--all"])
            .git_command(&["commit", "--quiet", "-m", message])
            .git_command(&["push", "--quiet", "origin", "master"])
    }

    // Return the commit id `name` points at in the bare repository.
    pub fn rev_parse(&mut self, name: &str) -> String {
        let output = Command::new("git")
            .current_dir(&self.bare)
            .args(&["rev-parse", name])
            .output()
            .unwrap();
        check_output("git", &output);
        String::from_utf8(output.stdout).unwrap().trim().to_owned()
    }

    pub fn write_simple_tree(&mut self) -> &mut TempGitRepo {
        self.write_file("a", "a\n")
            .write_file("b", "b\n")
            .symlink("a", "l")
            .write_file("d/c", "abc\n")
            .commit_and_push("init")
    }
}

impl Default for TempGitRepo {
    fn default() -> Self {
        TempGitRepo::new()
    }
}

fn check_output(what: &str, output: &std::process::Output) {
    if !output.status.success() {
        panic!(
            "{} command failed with status {:?}\n\nstdout:\n\n{}\n\nstderr:\n\n{}\n\n",
            what,
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::TempGitRepo;

    #[test]
    fn temp_path() {
        let path = {
            let mut r = TempGitRepo::new();
            r.git_command(&["status"]);

            let path = r.path().to_path_buf();
            assert_eq!(path.join("HEAD").is_file(), true);
            assert_eq!(path.join("objects").is_dir(), true);
            assert_eq!(r.work_path().join(".git").is_dir(), true);

            path
        };

        assert_eq!(path.as_path().is_dir(), false);
    }

    #[test]
    fn at_specific_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let repo_dir = temp_dir.path().join("tgr.git");

        assert_eq!(repo_dir.is_dir(), false);

        {
            let _r = TempGitRepo::new_at_path(&repo_dir);
            assert_eq!(repo_dir.join("HEAD").is_file(), true);
        }

        // The bare repo is left behind; only the working clone goes away.
        assert_eq!(repo_dir.is_dir(), true);
    }

    #[test]
    fn simple_tree_is_pushed() {
        let mut r = TempGitRepo::with_simple_tree();

        let head = r.rev_parse("master");
        assert_eq!(head.len(), 40);

        let files = r.git_output(&["ls-tree", "-r", "--name-only", "master"]);
        assert_eq!(files, "a\nb\nd/c\nl");
    }

    #[test]
    #[should_panic(expected = "git command failed with status")]
    fn git_command_error() {
        let mut r = TempGitRepo::new();
        r.git_command(&["bogus"]);
    }
}

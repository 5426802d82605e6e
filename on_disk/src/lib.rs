//! This crate provides the `ObjectSource` implementations that read git
//! repositories stored on the local file system.
//!
//! Two interchangeable backends are offered:
//!
//! * [`OnDiskSource`] reads loose objects, pack files and refs in-process.
//! * [`GitCommandSource`] runs the command-line `git cat-file` for each call.
//!
//! Both locate the git directory the same way (see [`find_git_dir`]), so a
//! bare repository and a working copy are handled alike.
//!
//! [`OnDiskSource`]: struct.OnDiskSource.html
//! [`GitCommandSource`]: struct.GitCommandSource.html
//! [`find_git_dir`]: fn.find_git_dir.html

#![deny(warnings)]

mod git_command;
pub use git_command::GitCommandSource;

mod git_dir;
pub use git_dir::find_git_dir;

mod loose;
mod odb;
mod pack;
mod refs;

mod on_disk_source;
pub use on_disk_source::OnDiskSource;

mod temp_git_repo;
pub use temp_git_repo::TempGitRepo;

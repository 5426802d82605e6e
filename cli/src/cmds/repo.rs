use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{App, Arg, ArgMatches, SubCommand};
use gitbarefs_core::repo::RepoView;
use tracing::info;

use super::{options, Cli, Result};
use crate::mount;

pub(crate) fn subcommand<'a, 'b>() -> App<'a, 'b> {
    let cmd = SubCommand::with_name("repo")
        .about("Mount the working tree of one git repository, read-only")
        .arg(
            Arg::with_name("src_dir")
                .required(true)
                .help("Bare repository or working copy to show"),
        )
        .arg(
            Arg::with_name("target_dir")
                .required(true)
                .help("The mount point"),
        );

    options::add_mount_args(options::add_view_args(cmd))
}

/// Resolve a source directory given on the command line.
pub(crate) fn source_dir(m: &ArgMatches) -> Result<PathBuf> {
    let path = options::path_arg(m, "src_dir");
    std::fs::canonicalize(&path)
        .map_err(|e| format!("{}: {}", path.display(), e).into())
}

pub(crate) fn compose(m: &ArgMatches) -> Result<Arc<RepoView>> {
    let view = RepoView::new(source_dir(m)?, options::root_object(m), options::view_context(m)?);

    // A path that isn't a repository at all is a usage error, unlike a
    // missing ref which only leaves the tree empty.
    view.is_stale()?;

    Ok(Arc::new(view))
}

pub(crate) fn run(_cli: &mut Cli, m: &ArgMatches) -> Result<()> {
    let view = compose(m)?;
    let target = options::path_arg(m, "target_dir");

    info!(
        repo = %view.repo_path().display(),
        root_object = view.ref_name(),
        target = %target.display(),
        "serving repository"
    );

    mount::mount(view, Path::new(&target), &options::mount_config(m))?;
    Ok(())
}

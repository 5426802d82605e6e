use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{App, Arg, ArgMatches, SubCommand};
use gitbarefs_core::fs::ReadOnlyFs;
use gitbarefs_core::gitolite::{GitoliteCommand, GitoliteConfig, GitoliteView};
use gitbarefs_core::registry::{RepoRegistry, RescanPolicy};
use tracing::info;

use super::{options, Cli, Result};
use crate::mount;

pub(crate) fn subcommand<'a, 'b>() -> App<'a, 'b> {
    let cmd = SubCommand::with_name("tree")
        .about("Mount every git repository found below a directory, read-only")
        .arg(
            Arg::with_name("src_dir")
                .required(true)
                .help("Directory searched for repositories"),
        )
        .arg(
            Arg::with_name("target_dir")
                .required(true)
                .help("The mount point"),
        );

    add_gitolite_args(options::add_mount_args(options::add_view_args(cmd)))
}

pub(crate) fn add_gitolite_args<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.arg(
        Arg::with_name("gitolite")
            .long("gitolite")
            .help("Show one directory per gitolite user holding the repositories they may read"),
    )
    .arg(
        Arg::with_name("gitolite-cmd")
            .long("gitolite-cmd")
            .value_name("path")
            .default_value("gitolite")
            .help("gitolite program asked for users and access rights"),
    )
    .arg(
        Arg::with_name("user-list")
            .long("user-list")
            .value_name("file")
            .requires("gitolite")
            .help("Extra users, one per line"),
    )
    .arg(
        Arg::with_name("htaccess")
            .long("htaccess")
            .requires("gitolite")
            .help("Add a .htaccess file to each user directory"),
    )
    .arg(
        Arg::with_name("htaccess-prefix")
            .long("htaccess-prefix")
            .value_name("text")
            .requires("htaccess")
            .help("Text placed before the Require line of each .htaccess file"),
    )
}

fn gitolite_config(m: &ArgMatches) -> GitoliteConfig {
    let htaccess = if m.is_present("htaccess") {
        Some(
            m.value_of("htaccess-prefix")
                .map(|prefix| prefix.replace("\\n", "\n"))
                .unwrap_or_default(),
        )
    } else {
        None
    };

    GitoliteConfig {
        user_list: m.value_of_os("user-list").map(PathBuf::from),
        htaccess,
        ..GitoliteConfig::default()
    }
}

pub(crate) fn compose(m: &ArgMatches) -> Result<Arc<dyn ReadOnlyFs>> {
    let root = super::repo::source_dir(m)?;
    if !root.is_dir() {
        return Err(format!("{}: not a directory", root.display()).into());
    }

    let ctx = options::view_context(m)?;
    let root_object = options::root_object(m);

    if !m.is_present("gitolite") {
        return Ok(Arc::new(RepoRegistry::new(
            root,
            root_object,
            ctx,
            RescanPolicy::default(),
        )));
    }

    let config = gitolite_config(m);
    let control = GitoliteCommand::new(
        options::path_arg(m, "gitolite-cmd"),
        root.join(&config.admin_repo),
        options::source_config(m)?.timeout,
    );

    Ok(Arc::new(GitoliteView::new(
        root,
        root_object,
        ctx,
        Box::new(control),
        config,
    )))
}

pub(crate) fn run(_cli: &mut Cli, m: &ArgMatches) -> Result<()> {
    let fs = compose(m)?;
    let target = options::path_arg(m, "target_dir");

    info!(
        root = %options::path_arg(m, "src_dir").display(),
        root_object = options::root_object(m),
        gitolite = m.is_present("gitolite"),
        target = %target.display(),
        "serving repositories"
    );

    mount::mount(fs, Path::new(&target), &options::mount_config(m))?;
    Ok(())
}

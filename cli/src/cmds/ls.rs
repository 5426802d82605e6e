use std::io::Write;
use std::sync::Arc;

use clap::{App, Arg, ArgMatches, SubCommand};
use gitbarefs_core::attr::{FileAttr, NodeKind};
use gitbarefs_core::fs::{self as vfs, ReadOnlyFs};

use super::{options, repo, tree, Cli, Result};

pub(crate) fn add_inspect_args<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    let app = app
        .arg(
            Arg::with_name("src_dir")
                .required(true)
                .help("Repository, or with --tree a directory of repositories"),
        )
        .arg(
            Arg::with_name("tree")
                .long("tree")
                .help("Treat src_dir as a directory of repositories"),
        );

    options::add_view_args(app)
}

pub(crate) fn subcommand<'a, 'b>() -> App<'a, 'b> {
    add_inspect_args(
        SubCommand::with_name("ls").about("List a directory of the view without mounting it"),
    )
    .arg(
        Arg::with_name("path")
            .default_value("/")
            .help("Path within the view"),
    )
    .arg(
        Arg::with_name("long")
            .short("l")
            .help("Show mode and size"),
    )
}

/// Build the view `repo` or `tree` would mount.
pub(crate) fn compose(m: &ArgMatches) -> Result<Arc<dyn ReadOnlyFs>> {
    if m.is_present("tree") {
        tree::compose(m)
    } else {
        Ok(repo::compose(m)?)
    }
}

fn write_entry(cli: &mut Cli, fs: &dyn ReadOnlyFs, path: &str, name: &str, long: bool) -> Result<()> {
    if !long {
        writeln!(cli, "{}", name)?;
        return Ok(());
    }

    let FileAttr { kind, mode, size, .. } = fs.getattr(path)?;
    write!(cli, "{:o} {:>10} {}", mode, size, name)?;

    if kind == NodeKind::Symlink {
        let target = fs.readlink(path)?;
        write!(cli, " -> {}", String::from_utf8_lossy(&target))?;
    }

    writeln!(cli)?;
    Ok(())
}

pub(crate) fn run(cli: &mut Cli, m: &ArgMatches) -> Result<()> {
    let fs = compose(m)?;
    let path = vfs::normalize(m.value_of("path").unwrap_or("/"));
    let long = m.is_present("long");

    if !fs.getattr(&path)?.is_dir() {
        let name = vfs::split(&path).1.to_owned();
        return write_entry(cli, fs.as_ref(), &path, &name, long);
    }

    let mut names = fs.readdir(&path)?;
    names.sort();

    for name in names {
        write_entry(cli, fs.as_ref(), &vfs::join(&path, &name), &name, long)?;
    }

    Ok(())
}

use std::io::Write;

use clap::{App, Arg, ArgMatches, SubCommand};
use gitbarefs_core::fs::{self as vfs, FsError, ReadOnlyFs};

use super::{ls, Cli, Result};

const CHUNK: usize = 128 * 1024;

pub(crate) fn subcommand<'a, 'b>() -> App<'a, 'b> {
    ls::add_inspect_args(
        SubCommand::with_name("cat").about("Print a file of the view without mounting it"),
    )
    .arg(
        Arg::with_name("path")
            .required(true)
            .help("Path within the view"),
    )
}

fn copy(cli: &mut Cli, fs: &dyn ReadOnlyFs, path: &str, fh: u64) -> Result<()> {
    let mut offset = 0;
    loop {
        let chunk = fs.read(path, CHUNK, offset, fh)?;
        if chunk.is_empty() {
            return Ok(());
        }
        cli.write_all(&chunk)?;
        offset += chunk.len() as u64;
    }
}

pub(crate) fn run(cli: &mut Cli, m: &ArgMatches) -> Result<()> {
    let fs = ls::compose(m)?;
    let path = vfs::normalize(m.value_of("path").unwrap_or("/"));

    if fs.getattr(&path)?.is_dir() {
        return Err(FsError::IsDir(path).into());
    }

    let fh = fs.open(&path, libc::O_RDONLY)?;
    let result = copy(cli, fs.as_ref(), &path, fh);
    fs.release(&path, fh)?;
    result
}

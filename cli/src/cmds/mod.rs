pub(crate) use crate::{App as Cli, Result};

mod cat;
mod ls;
mod options;
mod repo;
mod tree;

pub(crate) fn add_subcommands<'a, 'b>(app: clap::App<'a, 'b>) -> clap::App<'a, 'b> {
    app.subcommand(repo::subcommand())
        .subcommand(tree::subcommand())
        .subcommand(ls::subcommand())
        .subcommand(cat::subcommand())
}

pub(crate) fn dispatch(cli: &mut Cli) -> Result<()> {
    let matches = cli.arg_matches.clone();
    // ^^ Ugh. Need an independent copy of matches so we can still pass
    // the App struct through to subcommand imps.

    match matches.subcommand() {
        ("repo", Some(m)) => repo::run(cli, m),
        ("tree", Some(m)) => tree::run(cli, m),
        ("ls", Some(m)) => ls::run(cli, m),
        ("cat", Some(m)) => cat::run(cli, m),
        _ => unreachable!(),
        // unreachable: Should have exited out with appropriate help or
        // error message if no subcommand was given.
    }
}

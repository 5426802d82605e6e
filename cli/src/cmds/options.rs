// Flags shared by every subcommand that composes a view.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{App, Arg, ArgMatches};
use gitbarefs_core::cache::CacheConfig;
use gitbarefs_core::repo::{ViewConfig, ViewContext};
use gitbarefs_core::source::{ObjectSource, SourceConfig};
use gitbarefs_on_disk::{GitCommandSource, OnDiskSource};

use crate::mount::MountConfig;
use crate::Result;

pub(crate) fn add_view_args<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.arg(
        Arg::with_name("root-object")
            .long("root-object")
            .value_name("ref")
            .default_value("master")
            .help("Branch, tag or commit whose tree is shown"),
    )
    .arg(
        Arg::with_name("backend")
            .long("backend")
            .value_name("backend")
            .possible_values(&["native", "git"])
            .default_value("native")
            .help("Read objects in-process or through the git command"),
    )
    .arg(
        Arg::with_name("git")
            .long("git")
            .value_name("path")
            .default_value("git")
            .help("git program used by the git backend"),
    )
    .arg(
        Arg::with_name("timeout")
            .long("timeout")
            .value_name("seconds")
            .default_value("3")
            .help("Give up on a repository read after this long"),
    )
    .arg(
        Arg::with_name("cache-size")
            .long("cache-size")
            .value_name("bytes")
            .help("Upper bound on cached file content (default 1 GiB)"),
    )
    .arg(
        Arg::with_name("no-annex")
            .long("no-annex")
            .help("Show git-annex pointers as plain symlinks"),
    )
    .arg(
        Arg::with_name("strict")
            .long("strict")
            .help("Fail instead of showing an empty tree when the root object is missing"),
    )
}

pub(crate) fn add_mount_args<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.arg(
        Arg::with_name("allow-other")
            .long("allow-other")
            .help("Allow other users to access the mount (needs user_allow_other in /etc/fuse.conf)"),
    )
    .arg(
        Arg::with_name("daemon")
            .long("daemon")
            .help("Detach and keep serving in the background"),
    )
}

pub(crate) fn mount_config(m: &ArgMatches) -> MountConfig {
    MountConfig {
        allow_other: m.is_present("allow-other"),
        daemon: m.is_present("daemon"),
    }
}

pub(crate) fn root_object<'a>(m: &'a ArgMatches) -> &'a str {
    m.value_of("root-object").unwrap_or("master")
}

pub(crate) fn path_arg(m: &ArgMatches, name: &str) -> PathBuf {
    PathBuf::from(m.value_of_os(name).unwrap_or_default())
}

fn parse_number<T: std::str::FromStr>(m: &ArgMatches, name: &str) -> Result<Option<T>> {
    match m.value_of(name) {
        None => Ok(None),
        Some(value) => match value.parse() {
            Ok(n) => Ok(Some(n)),
            Err(_) => Err(format!("invalid value for --{}: {}", name, value).into()),
        },
    }
}

pub(crate) fn source_config(m: &ArgMatches) -> Result<SourceConfig> {
    let mut config = SourceConfig::default();

    if let Some(seconds) = parse_number::<f64>(m, "timeout")? {
        if !(seconds > 0.0 && seconds.is_finite()) {
            return Err("invalid value for --timeout: must be positive".into());
        }
        config.timeout = Duration::from_secs_f64(seconds);
    }

    if let Some(git) = m.value_of_os("git") {
        config.git = PathBuf::from(git);
    }

    Ok(config)
}

pub(crate) fn object_source(m: &ArgMatches) -> Result<Arc<dyn ObjectSource>> {
    let config = source_config(m)?;

    Ok(match m.value_of("backend") {
        Some("git") => Arc::new(GitCommandSource::new(config)),
        _ => Arc::new(OnDiskSource::new(&config)),
    })
}

pub(crate) fn view_context(m: &ArgMatches) -> Result<ViewContext> {
    let mut cache = CacheConfig::default();
    if let Some(size) = parse_number(m, "cache-size")? {
        cache.max_cache_size = size;
    }

    let config = ViewConfig {
        annex: !m.is_present("no-annex"),
        strict_ref: m.is_present("strict"),
        ..ViewConfig::default()
    };

    Ok(ViewContext::new(object_source(m)?, cache, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> ArgMatches<'static> {
        let app = add_mount_args(add_view_args(App::new("test")));
        let mut argv = vec!["test"];
        argv.extend_from_slice(args);
        app.get_matches_from_safe(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let m = matches(&[]);

        assert_eq!(root_object(&m), "master");

        let config = source_config(&m).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.git, PathBuf::from("git"));

        let ctx = view_context(&m).unwrap();
        assert_eq!(ctx.cache.config().max_cache_size, 1024 * 1024 * 1024);
        assert!(ctx.config.annex);
        assert!(!ctx.config.strict_ref);

        let mount = mount_config(&m);
        assert!(!mount.allow_other && !mount.daemon);
    }

    #[test]
    fn overrides() {
        let m = matches(&[
            "--root-object",
            "main",
            "--cache-size",
            "4096",
            "--timeout",
            "0.5",
            "--no-annex",
            "--strict",
        ]);

        assert_eq!(root_object(&m), "main");
        assert_eq!(source_config(&m).unwrap().timeout, Duration::from_millis(500));

        let ctx = view_context(&m).unwrap();
        assert_eq!(ctx.cache.config().max_cache_size, 4096);
        assert!(!ctx.config.annex);
        assert!(ctx.config.strict_ref);
    }

    #[test]
    fn bad_numbers() {
        let m = matches(&["--cache-size", "lots"]);
        let err = view_context(&m).err().unwrap();
        assert_eq!(err.to_string(), "invalid value for --cache-size: lots");

        let m = matches(&["--timeout", "0"]);
        assert!(source_config(&m).is_err());
    }

    #[test]
    fn unknown_backend() {
        let app = add_view_args(App::new("test"));
        assert!(app
            .get_matches_from_safe(vec!["test", "--backend", "svn"])
            .is_err());
    }
}

use super::*;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::attr::NodeKind;
use crate::object::FileMode;
use crate::test_support::MemorySource;

const REPO: &str = "/srv/git/repo1.git";

fn basic_files() -> Vec<(&'static str, FileMode, &'static str)> {
    vec![
        ("a", FileMode::Normal, "a\n"),
        ("b", FileMode::Executable, "bb\n"),
        ("d/c", FileMode::Normal, "ccc\n"),
        ("l", FileMode::SymbolicLink, "a"),
    ]
}

fn view_with(source: &Arc<MemorySource>, config: ViewConfig) -> RepoView {
    let ctx = ViewContext::new(source.clone(), CacheConfig::default(), config);
    RepoView::new(REPO, "master", ctx)
}

fn setup() -> (Arc<MemorySource>, RepoView) {
    let source = Arc::new(MemorySource::new());
    source.commit(REPO, "master", &basic_files(), 1_600_000_000);
    let view = view_with(&source, ViewConfig::default());
    (source, view)
}

fn names(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
}

fn read_all(view: &RepoView, path: &str) -> Vec<u8> {
    let fh = view.open(path, libc::O_RDONLY).unwrap();
    let content = view.read(path, 1 << 20, 0, fh).unwrap();
    view.release(path, fh).unwrap();
    content
}

#[test]
fn readdir_tree() {
    let (_source, view) = setup();

    assert_eq!(names(view.readdir("/").unwrap()), vec!["a", "b", "d", "l"]);
    assert_eq!(view.readdir("/d").unwrap(), vec!["c"]);
    assert_eq!(view.readdir("/d/").unwrap(), vec!["c"]);
}

#[test]
fn readdir_unknown_is_empty() {
    let (_source, view) = setup();

    assert!(view.readdir("/nope").unwrap().is_empty());
    assert!(view.readdir("/a").unwrap().is_empty());
}

#[test]
fn readdir_kinds_from_snapshot() {
    let (source, view) = setup();

    let mut root = view.readdir_kinds("/").unwrap();
    root.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        root,
        vec![
            ("a".to_owned(), NodeKind::RegularFile),
            ("b".to_owned(), NodeKind::RegularFile),
            ("d".to_owned(), NodeKind::Directory),
            ("l".to_owned(), NodeKind::Symlink),
        ]
    );

    let blobs = source.blob_fetches();
    assert_eq!(
        view.readdir_kinds("/d").unwrap(),
        vec![("c".to_owned(), NodeKind::RegularFile)]
    );
    assert_eq!(source.blob_fetches(), blobs);
    assert_eq!(source.size_calls(), 0);

    assert!(view.readdir_kinds("/nope").unwrap().is_empty());
}

#[test]
fn read_directory_is_eisdir() {
    let (_source, view) = setup();

    let fh = view.open("/d", libc::O_RDONLY).unwrap();
    let err = view.read("/d", 10, 0, fh).unwrap_err();
    assert!(matches!(err, FsError::IsDir(_)));
    assert_eq!(err.errno(), libc::EISDIR);
    view.release("/d", fh).unwrap();
}

#[test]
fn getattr_kinds() {
    let (_source, view) = setup();
    let time = commit_time(1_600_000_000);

    let root = view.getattr("/").unwrap();
    assert_eq!(root.kind, NodeKind::Directory);
    assert_eq!(root.mode, 16893);
    assert_eq!(root.size, 4096);
    assert_eq!(root.time, time);

    let d = view.getattr("/d").unwrap();
    assert!(d.is_dir());

    let a = view.getattr("/a").unwrap();
    assert_eq!(a.kind, NodeKind::RegularFile);
    assert_eq!(a.mode, 33204);
    assert_eq!(a.size, 2);
    assert_eq!(a.time, time);

    let b = view.getattr("/b").unwrap();
    assert_eq!(b.mode, 33277);
    assert_eq!(b.size, 3);

    let l = view.getattr("/l").unwrap();
    assert_eq!(l.kind, NodeKind::Symlink);
    assert_eq!(l.mode, 41471);
    assert_eq!(l.size, 1);

    let c = view.getattr("/d/c").unwrap();
    assert_eq!(c.size, 4);
}

#[test]
fn getattr_unknown() {
    let (_source, view) = setup();

    assert!(matches!(view.getattr("/x"), Err(FsError::NotFound(_))));
    assert!(matches!(view.getattr("/d/x"), Err(FsError::NotFound(_))));
    assert!(matches!(view.getattr("/x/y"), Err(FsError::NotFound(_))));
}

#[test]
fn custom_modes() {
    let source = Arc::new(MemorySource::new());
    source.commit(REPO, "master", &basic_files(), 0);
    let view = view_with(
        &source,
        ViewConfig {
            modes: ModeTable {
                regular: 0o100644,
                executable: 0o100755,
                symlink: 0o120777,
                directory: 0o040755,
            },
            ..ViewConfig::default()
        },
    );

    assert_eq!(view.getattr("/").unwrap().mode, 0o040755);
    assert_eq!(view.getattr("/a").unwrap().mode, 0o100644);
    assert_eq!(view.getattr("/b").unwrap().mode, 0o100755);
}

#[test]
fn readlink_literal() {
    let (_source, view) = setup();

    assert_eq!(view.readlink("/l").unwrap(), b"a");
    assert!(matches!(view.readlink("/a"), Err(FsError::NotFound(_))));
}

#[test]
fn read_content() {
    let (_source, view) = setup();

    assert_eq!(read_all(&view, "/a"), b"a\n");
    assert_eq!(read_all(&view, "/d/c"), b"ccc\n");

    let fh = view.open("/d/c", libc::O_RDONLY).unwrap();
    assert_eq!(view.read("/d/c", 2, 1, fh).unwrap(), b"cc");
    assert_eq!(view.read("/d/c", 10, 3, fh).unwrap(), b"\n");
    assert_eq!(view.read("/d/c", 10, 10, fh).unwrap(), b"");
    assert!(matches!(
        view.read("/d/nope", 10, 0, fh),
        Err(FsError::NotFound(_))
    ));
    view.release("/d/c", fh).unwrap();
}

#[test]
fn read_bad_handle() {
    let (_source, view) = setup();
    view.ensure_fresh().unwrap();

    assert!(matches!(
        view.read("/a", 10, 0, 99),
        Err(FsError::BadHandle(99))
    ));

    let fh = view.open("/a", libc::O_RDONLY).unwrap();
    view.release("/a", fh).unwrap();
    assert!(matches!(
        view.read("/a", 10, 0, fh),
        Err(FsError::BadHandle(_))
    ));
    assert!(matches!(view.release("/a", fh), Err(FsError::BadHandle(_))));
}

#[test]
fn open_checks() {
    let (_source, view) = setup();

    assert!(matches!(
        view.open("/a", libc::O_WRONLY),
        Err(FsError::ReadOnly)
    ));
    assert!(matches!(
        view.open("/a", libc::O_RDWR),
        Err(FsError::ReadOnly)
    ));
    assert!(matches!(
        view.open("/missing", libc::O_RDONLY),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn too_many_open_files() {
    let source = Arc::new(MemorySource::new());
    source.commit(REPO, "master", &basic_files(), 0);
    let view = view_with(
        &source,
        ViewConfig {
            max_handles: 2,
            ..ViewConfig::default()
        },
    );

    view.open("/a", libc::O_RDONLY).unwrap();
    view.open("/a", libc::O_RDONLY).unwrap();
    assert!(matches!(
        view.open("/a", libc::O_RDONLY),
        Err(FsError::TooManyOpenFiles)
    ));
}

#[test]
fn no_rebuild_while_ref_unchanged() {
    let (source, view) = setup();

    view.readdir("/").unwrap();
    let fetches = source.tree_fetches();

    view.getattr("/a").unwrap();
    view.readdir("/d").unwrap();
    assert!(!view.is_stale().unwrap());
    assert_eq!(source.tree_fetches(), fetches);
}

#[test]
fn follows_new_commits() {
    let (source, view) = setup();
    assert_eq!(names(view.readdir("/").unwrap()), vec!["a", "b", "d", "l"]);

    let mut files = basic_files();
    files.push(("foo", FileMode::SymbolicLink, "d/c"));
    source.commit(REPO, "master", &files, 1_600_000_100);

    assert!(view.is_stale().unwrap());
    assert_eq!(
        names(view.readdir("/").unwrap()),
        vec!["a", "b", "d", "foo", "l"]
    );
    assert_eq!(view.readlink("/foo").unwrap(), b"d/c");
    assert_eq!(view.getattr("/").unwrap().time, commit_time(1_600_000_100));
}

#[test]
fn handles_fenced_by_rebuild() {
    let (source, view) = setup();

    let fh = view.open("/a", libc::O_RDONLY).unwrap();
    assert_eq!(view.read("/a", 10, 0, fh).unwrap(), b"a\n");

    let mut files = basic_files();
    files[0] = ("a", FileMode::Normal, "changed\n");
    source.commit(REPO, "master", &files, 1);
    view.getattr("/a").unwrap();

    assert!(matches!(
        view.read("/a", 10, 0, fh),
        Err(FsError::BadHandle(_))
    ));

    assert_eq!(read_all(&view, "/a"), b"changed\n");
}

#[test]
fn missing_ref_is_empty_root() {
    let source = Arc::new(MemorySource::new());
    source.add_repo(REPO);
    let view = view_with(&source, ViewConfig::default());

    let root = view.getattr("/").unwrap();
    assert!(root.is_dir());
    assert!(view.readdir("/").unwrap().is_empty());
    assert!(matches!(view.getattr("/a"), Err(FsError::NotFound(_))));
    assert!(view.current().is_none());

    // A ref created later shows up without any manual step.
    source.commit(REPO, "master", &basic_files(), 0);
    assert_eq!(names(view.readdir("/").unwrap()), vec!["a", "b", "d", "l"]);
}

#[test]
fn ref_removed_later() {
    let (source, view) = setup();
    let fh = view.open("/a", libc::O_RDONLY).unwrap();

    source.remove_ref(REPO, "master");
    assert!(view.readdir("/").unwrap().is_empty());
    assert!(matches!(
        view.read("/a", 1, 0, fh),
        Err(FsError::BadHandle(_))
    ));
}

#[test]
fn strict_ref() {
    let source = Arc::new(MemorySource::new());
    source.add_repo(REPO);
    let view = view_with(
        &source,
        ViewConfig {
            strict_ref: true,
            ..ViewConfig::default()
        },
    );

    assert!(matches!(view.getattr("/"), Err(FsError::NotFound(_))));
}

#[test]
fn backend_failure_is_not_cached() {
    let (source, view) = setup();
    view.readdir("/").unwrap();

    source.commit(REPO, "master", &[("z", FileMode::Normal, "z")], 5);
    source.set_failing(true);

    let err = view.readdir("/").unwrap_err();
    assert_eq!(err.errno(), libc::EIO);

    // The old snapshot is still in place.
    assert!(view.current().unwrap().blob("/a").is_some());

    source.set_failing(false);
    assert_eq!(view.readdir("/").unwrap(), vec!["z"]);
}

#[test]
fn unknown_repo() {
    let source = Arc::new(MemorySource::new());
    let view = view_with(&source, ViewConfig::default());

    assert!(matches!(
        view.getattr("/"),
        Err(FsError::Backend(SourceError::RepoNotFound(_)))
    ));
}

#[test]
fn drop_revokes_handles() {
    let (_source, view) = setup();
    let handles = view.ctx.handles.clone();

    let fh = view.open("/a", libc::O_RDONLY).unwrap();
    assert!(handles.is_valid(Path::new(REPO), fh));

    drop(view);
    assert!(!handles.is_valid(Path::new(REPO), fh));
}

#[test]
fn readers_never_see_mixed_snapshots() {
    let source = Arc::new(MemorySource::new());
    let first = [
        ("a", FileMode::Normal, "1"),
        ("b", FileMode::Normal, "1"),
        ("d1/x", FileMode::Normal, "1"),
    ];
    let second = [
        ("p", FileMode::Normal, "2"),
        ("q", FileMode::Normal, "2"),
        ("r", FileMode::Normal, "2"),
        ("d2/y", FileMode::Normal, "2"),
    ];
    source.commit(REPO, "master", &first, 0);
    source.set_tree_delay(Duration::from_millis(2));

    let view = Arc::new(view_with(&source, ViewConfig::default()));
    let stop = Arc::new(AtomicBool::new(false));

    let first_names: HashSet<String> = ["a", "b", "d1"].iter().map(|s| s.to_string()).collect();
    let second_names: HashSet<String> =
        ["p", "q", "r", "d2"].iter().map(|s| s.to_string()).collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let view = view.clone();
            let stop = stop.clone();
            let first_names = first_names.clone();
            let second_names = second_names.clone();
            thread::spawn(move || {
                let mut checks = 0;
                while !stop.load(Ordering::SeqCst) {
                    let listed: HashSet<String> =
                        view.readdir("/").unwrap().into_iter().collect();
                    assert!(listed == first_names || listed == second_names);
                    checks += 1;
                }
                checks
            })
        })
        .collect();

    for i in 0..10 {
        let files: &[(&str, FileMode, &str)] = if i % 2 == 0 { &second } else { &first };
        source.commit(REPO, "master", files, i);
        thread::sleep(Duration::from_millis(10));
    }

    stop.store(true, Ordering::SeqCst);
    for r in readers {
        assert!(r.join().unwrap() > 0);
    }
}

mod annexed {
    use super::*;

    use std::fs;

    const KEY: &str = "SHA256E-s4--d9ab3c6a1e9e1e0a3ab3e7b0e3bd3a0dbe12d3b7e0b1f1f6fe2eb5cc5a1b0f61";

    fn annex_repo() -> (tempfile::TempDir, Arc<MemorySource>, RepoView, String) {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().to_str().unwrap().to_owned();
        let target = format!("../annex/objects/xx/yy/{0}/{0}", KEY);

        let source = Arc::new(MemorySource::new());
        source.commit(
            &repo,
            "master",
            &[
                ("f1", FileMode::SymbolicLink, target.as_str()),
                ("plain", FileMode::SymbolicLink, "f1"),
            ],
            0,
        );

        let ctx = ViewContext::new(
            source.clone(),
            CacheConfig::default(),
            ViewConfig::default(),
        );
        let view = RepoView::new(&repo, "master", ctx);
        (dir, source, view, target)
    }

    fn store(dir: &Path, content: &[u8]) {
        let hash = format!("{:x}", md5::compute(KEY.as_bytes()));
        let obj_dir = dir
            .join("annex/objects")
            .join(&hash[0..3])
            .join(&hash[3..6])
            .join(KEY);
        fs::create_dir_all(&obj_dir).unwrap();
        fs::write(obj_dir.join(KEY), content).unwrap();
    }

    #[test]
    fn present_content_replaces_pointer() {
        let (dir, _source, view, _target) = annex_repo();
        store(dir.path(), b"data");

        let attr = view.getattr("/f1").unwrap();
        assert_eq!(attr.kind, NodeKind::RegularFile);
        assert_eq!(attr.size, 4);
        assert_eq!(read_all(&view, "/f1"), b"data");
    }

    #[test]
    fn readdir_kinds_sees_annexed_content() {
        let (dir, _source, view, _target) = annex_repo();
        store(dir.path(), b"data");

        let mut kinds = view.readdir_kinds("/").unwrap();
        kinds.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            kinds,
            vec![
                ("f1".to_owned(), NodeKind::RegularFile),
                ("plain".to_owned(), NodeKind::Symlink),
            ]
        );
    }

    #[test]
    fn dangling_pointer_stays_a_symlink() {
        let (_dir, _source, view, target) = annex_repo();

        let attr = view.getattr("/f1").unwrap();
        assert_eq!(attr.kind, NodeKind::Symlink);
        assert_eq!(attr.size, target.len() as u64);
        assert_eq!(view.readlink("/f1").unwrap(), target.as_bytes());
    }

    #[test]
    fn ordinary_symlinks_untouched() {
        let (dir, _source, view, _target) = annex_repo();
        store(dir.path(), b"data");

        assert_eq!(view.getattr("/plain").unwrap().kind, NodeKind::Symlink);
        assert_eq!(view.readlink("/plain").unwrap(), b"f1");
    }

    #[test]
    fn disabled() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().to_str().unwrap().to_owned();
        let target = format!("annex/objects/xx/yy/{0}/{0}", KEY);
        store(dir.path(), b"data");

        let source = Arc::new(MemorySource::new());
        source.commit(&repo, "master", &[("f1", FileMode::SymbolicLink, target.as_str())], 0);
        let ctx = ViewContext::new(
            source,
            CacheConfig::default(),
            ViewConfig {
                annex: false,
                ..ViewConfig::default()
            },
        );
        let view = RepoView::new(&repo, "master", ctx);

        assert_eq!(view.getattr("/f1").unwrap().kind, NodeKind::Symlink);
    }

    #[test]
    fn pointer_into_neighbour_stays_a_symlink() {
        let root = tempfile::tempdir().unwrap();
        let public = root.path().join("public.git");
        let secret = root.path().join("private.git/annex/objects/aa/bb/KEY");
        fs::create_dir_all(public.join("annex/objects")).unwrap();
        fs::create_dir_all(&secret).unwrap();
        fs::write(secret.join("KEY"), b"top secret").unwrap();

        let repo = public.to_str().unwrap().to_owned();
        let target = "../private.git/annex/objects/aa/bb/KEY/KEY";
        let source = Arc::new(MemorySource::new());
        source.commit(&repo, "master", &[("leak", FileMode::SymbolicLink, target)], 0);
        let ctx = ViewContext::new(source, CacheConfig::default(), ViewConfig::default());
        let view = RepoView::new(&repo, "master", ctx);

        assert_eq!(view.getattr("/leak").unwrap().kind, NodeKind::Symlink);
        assert_eq!(view.readlink("/leak").unwrap(), target.as_bytes());
        assert_eq!(read_all(&view, "/leak"), target.as_bytes());

        let kinds = view.readdir_kinds("/").unwrap();
        assert_eq!(kinds, vec![("leak".to_owned(), NodeKind::Symlink)]);
    }
}

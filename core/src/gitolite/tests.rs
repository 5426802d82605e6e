use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::object::FileMode;
use crate::repo::ViewConfig;
use crate::test_support::MemorySource;

const ROOT: &str = "/srv/gitolite";

#[derive(Default)]
struct FakeControl {
    users: Mutex<Vec<String>>,
    access: Mutex<BTreeMap<String, Vec<String>>>,
    repos: Mutex<Vec<String>>,
    access_calls: AtomicUsize,
}

impl FakeControl {
    fn grant(&self, user: &str, repos: &[&str]) {
        self.access.lock().insert(
            user.to_owned(),
            repos.iter().map(|r| r.to_string()).collect(),
        );
    }
}

impl AccessControl for Arc<FakeControl> {
    fn list_users(&self) -> source::Result<Vec<String>> {
        Ok(self.users.lock().clone())
    }

    fn list_repos(&self) -> source::Result<Vec<String>> {
        Ok(self.repos.lock().clone())
    }

    fn accessible_repos(&self, user: &str, repos: &[String]) -> source::Result<Vec<String>> {
        self.access_calls.fetch_add(1, Ordering::SeqCst);
        let access = self.access.lock();
        Ok(repos
            .iter()
            .filter(|r| access.get(user).map_or(false, |a| a.contains(*r)))
            .cloned()
            .collect())
    }
}

struct Fixture {
    source: Arc<MemorySource>,
    control: Arc<FakeControl>,
    view: GitoliteView,
}

impl Fixture {
    fn new(config: GitoliteConfig) -> Self {
        let source = Arc::new(MemorySource::new());
        source.commit(
            &admin(),
            "master",
            &[("conf/gitolite.conf", FileMode::Normal, "repo @all\n")],
            0,
        );

        for repo in &["repoA", "repoB", "group/repoC"] {
            source.commit(
                &format!("{}/{}.git", ROOT, repo),
                "master",
                &[("README", FileMode::Normal, *repo)],
                0,
            );
        }

        let control = Arc::new(FakeControl::default());
        *control.users.lock() = vec!["user1".to_owned(), "user2".to_owned()];
        *control.repos.lock() = vec!["repoA".to_owned(), "repoB".to_owned()];
        control.grant("user1", &["repoA", "repoB"]);
        control.grant("user2", &["repoB"]);

        let ctx = ViewContext::new(source.clone(), CacheConfig::default(), ViewConfig::default());
        let view = GitoliteView::new(ROOT, "master", ctx, Box::new(control.clone()), config);

        Fixture {
            source,
            control,
            view,
        }
    }

    /// Simulate a push to the admin repository.
    fn push_admin(&self, n: i64) {
        self.source.commit(
            &admin(),
            "master",
            &[("conf/gitolite.conf", FileMode::Normal, &*"x".repeat(n as usize))],
            n,
        );
    }
}

fn admin() -> String {
    format!("{}/gitolite-admin.git", ROOT)
}

fn with_htaccess() -> GitoliteConfig {
    GitoliteConfig {
        htaccess: Some(String::new()),
        ..GitoliteConfig::default()
    }
}

#[test]
fn per_user_listing() {
    let f = Fixture::new(with_htaccess());

    assert_eq!(f.view.readdir("/").unwrap(), vec!["user1", "user2"]);
    assert_eq!(
        f.view.readdir("/user1").unwrap(),
        vec!["repoA", "repoB", ".htaccess"]
    );
    assert_eq!(f.view.readdir("/user2").unwrap(), vec!["repoB", ".htaccess"]);
}

#[test]
fn revoked_access_disappears() {
    let f = Fixture::new(with_htaccess());
    assert_eq!(
        f.view.readdir("/user1").unwrap(),
        vec!["repoA", "repoB", ".htaccess"]
    );

    f.control.grant("user1", &["repoB"]);
    f.push_admin(1);

    assert_eq!(f.view.readdir("/user1").unwrap(), vec!["repoB", ".htaccess"]);
    assert!(matches!(
        f.view.getattr("/user1/repoA"),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn access_queried_once_per_user() {
    let f = Fixture::new(GitoliteConfig::default());

    f.view.readdir("/user1").unwrap();
    f.view.readdir("/user1").unwrap();
    f.view.getattr("/user1/repoA/README").unwrap();
    f.view.readdir("/user2").unwrap();
    assert_eq!(f.control.access_calls.load(Ordering::SeqCst), 2);

    f.push_admin(2);
    f.view.readdir("/user1").unwrap();
    assert_eq!(f.control.access_calls.load(Ordering::SeqCst), 3);
}

#[test]
fn listing_kinds() {
    let f = Fixture::new(with_htaccess());

    assert_eq!(
        f.view.readdir_kinds("/").unwrap(),
        vec![
            ("user1".to_owned(), NodeKind::Directory),
            ("user2".to_owned(), NodeKind::Directory),
        ]
    );
    assert_eq!(
        f.view.readdir_kinds("/user2").unwrap(),
        vec![
            ("repoB".to_owned(), NodeKind::Directory),
            (".htaccess".to_owned(), NodeKind::RegularFile),
        ]
    );
    assert_eq!(
        f.view.readdir_kinds("/user2/repoB").unwrap(),
        vec![("README".to_owned(), NodeKind::RegularFile)]
    );
    assert!(matches!(
        f.view.readdir_kinds("/mallory"),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn repository_content() {
    let f = Fixture::new(GitoliteConfig::default());

    assert!(f.view.getattr("/user2/repoB").unwrap().is_dir());
    assert_eq!(f.view.readdir("/user2/repoB").unwrap(), vec!["README"]);

    let fh = f.view.open("/user2/repoB/README", libc::O_RDONLY).unwrap();
    assert_eq!(
        f.view.read("/user2/repoB/README", 100, 0, fh).unwrap(),
        b"repoB"
    );
    f.view.release("/user2/repoB/README", fh).unwrap();

    assert!(matches!(
        f.view.getattr("/user2/repoA/README"),
        Err(FsError::NotFound(_))
    ));
    assert!(matches!(
        f.view.open("/user2/repoB/README", libc::O_WRONLY),
        Err(FsError::ReadOnly)
    ));
}

#[test]
fn unknown_user() {
    let f = Fixture::new(GitoliteConfig::default());

    assert!(matches!(f.view.getattr("/mallory"), Err(FsError::NotFound(_))));
    assert!(matches!(f.view.readdir("/mallory"), Err(FsError::NotFound(_))));
    assert!(matches!(f.view.getattr("/user"), Err(FsError::NotFound(_))));
}

#[test]
fn htaccess_file() {
    let f = Fixture::new(GitoliteConfig {
        htaccess: Some("AuthType Basic\n".to_owned()),
        ..GitoliteConfig::default()
    });

    let expected = b"AuthType Basic\nRequire user user1\n";
    let attr = f.view.getattr("/user1/.htaccess").unwrap();
    assert!(!attr.is_dir());
    assert_eq!(attr.size, expected.len() as u64);

    let fh = f.view.open("/user1/.htaccess", libc::O_RDONLY).unwrap();
    assert_eq!(
        f.view.read("/user1/.htaccess", 1000, 0, fh).unwrap(),
        &expected[..]
    );
    assert_eq!(
        f.view.read("/user1/.htaccess", 7, 15, fh).unwrap(),
        b"Require"
    );
    f.view.release("/user1/.htaccess", fh).unwrap();

    assert!(matches!(
        f.view.read("/user1/.htaccess", 10, 0, fh),
        Err(FsError::BadHandle(_))
    ));
}

#[test]
fn htaccess_disabled() {
    let f = Fixture::new(GitoliteConfig::default());

    assert_eq!(f.view.readdir("/user2").unwrap(), vec!["repoB"]);
    assert!(matches!(
        f.view.getattr("/user2/.htaccess"),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn htaccess_template() {
    assert_eq!(htaccess_content("", "bob"), "Require user bob\n");
    assert_eq!(htaccess_content("# x\n", "bob"), "# x\nRequire user bob\n");
}

#[test]
fn nested_repository_names() {
    let f = Fixture::new(GitoliteConfig::default());
    f.control.repos.lock().push("group/repoC".to_owned());
    f.control.grant("user2", &["repoB", "group/repoC"]);
    f.push_admin(3);

    assert_eq!(f.view.readdir("/user2").unwrap(), vec!["group", "repoB"]);
    assert!(f.view.getattr("/user2/group").unwrap().is_dir());
    assert_eq!(f.view.readdir("/user2/group").unwrap(), vec!["repoC"]);
    assert_eq!(
        f.view.readdir("/user2/group/repoC").unwrap(),
        vec!["README"]
    );
    assert_eq!(f.view.readdir("/user1").unwrap(), vec!["repoA", "repoB"]);
}

#[test]
fn user_list_file() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("users");
    std::fs::write(&list, "# web users\nextra\nuser1\n\n").unwrap();

    let f = Fixture::new(GitoliteConfig {
        user_list: Some(list.clone()),
        ..GitoliteConfig::default()
    });
    f.control.grant("extra", &["repoA"]);

    assert_eq!(f.view.readdir("/").unwrap(), vec!["user1", "user2", "extra"]);
    assert_eq!(f.view.readdir("/extra").unwrap(), vec!["repoA"]);

    // A newer file is picked up without an admin push.
    std::thread::sleep(Duration::from_millis(20));
    std::fs::write(&list, "extra\nlate\n").unwrap();
    let later = SystemTime::now() + Duration::from_secs(5);
    touch(&list, later);
    assert_eq!(
        f.view.readdir("/").unwrap(),
        vec!["user1", "user2", "extra", "late"]
    );

    // A vanished file means no extra users, not a stale list.
    std::fs::remove_file(&list).unwrap();
    assert_eq!(f.view.readdir("/").unwrap(), vec!["user1", "user2"]);
}

// Filesystems with coarse timestamps could otherwise report the same
// mtime for both writes.
fn touch(path: &Path, time: SystemTime) {
    let f = std::fs::File::options().write(true).open(path).unwrap();
    f.set_modified(time).unwrap();
}

#[test]
fn missing_admin_ref_still_serves() {
    let f = Fixture::new(GitoliteConfig::default());
    f.source.remove_ref(&admin(), "master");

    assert_eq!(f.view.readdir("/").unwrap(), vec!["user1", "user2"]);
    assert_eq!(f.view.readdir("/user2").unwrap(), vec!["repoB"]);
}

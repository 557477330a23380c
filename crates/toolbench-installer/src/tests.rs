use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use toolbench_core::{ArchiveType, DependencyKinds, Package, PackageSource, ToolbenchError};
use toolbench_registry::{FeedParser, Fetcher};
use toolbench_security::sha512_file;

use super::*;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_install_root() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_ROOT_COUNTER.fetch_add(1, Ordering::SeqCst);
    let root = std::env::temp_dir().join(format!(
        "toolbench-installer-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
}

fn open_database(root: &Path) -> Database {
    let layout = ToolbenchLayout::new(root);
    Database::open(&layout, "linux64").expect("database must open")
}

/// Builds `<root>/<top>.tar.gz` holding a single `<top>/` directory.
fn package_archive(root: &Path, top: &str, manifest: Option<&str>) -> PathBuf {
    let src = root.join("fixtures").join(top);
    write_file(&src.join("bin").join("tool"), "#!/bin/sh\n");
    if let Some(manifest) = manifest {
        write_file(&src.join("package.xml"), manifest);
    }

    let archive_path = root.join("fixtures").join(format!("{top}.tar.gz"));
    let file = File::create(&archive_path).expect("must create archive");
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder
        .append_dir_all(top, &src)
        .expect("must append package dir");
    builder
        .into_inner()
        .expect("must finish tar")
        .finish()
        .expect("must finish gzip");
    archive_path
}

fn archive_package(name: &str, version: &str, url: &str, checksum: Option<&str>) -> Package {
    let mut package = Package::new(name).with_version(version);
    package.url = Some(url.to_string());
    package.checksum = checksum.map(str::to_string);
    package
}

#[derive(Default)]
struct FeedLog {
    parsed: Vec<String>,
    recorded: BTreeMap<String, String>,
    writes: usize,
}

/// Hands out a fixed package list.
struct StaticFeed {
    packages: Vec<Package>,
    strict: bool,
    root: Option<PathBuf>,
    read_only: Vec<String>,
    log: Rc<RefCell<FeedLog>>,
}

impl StaticFeed {
    fn new(packages: Vec<Package>, log: &Rc<RefCell<FeedLog>>) -> Self {
        Self {
            packages,
            strict: true,
            root: None,
            read_only: Vec::new(),
            log: Rc::clone(log),
        }
    }

    fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    fn remote(mut self) -> Self {
        self.read_only = self
            .packages
            .iter()
            .map(|package| package.name.clone())
            .collect();
        self
    }
}

impl FeedParser for StaticFeed {
    fn parse(&mut self, feed: &str, _branch: Option<&str>, _name: Option<&str>) -> Result<()> {
        self.log.borrow_mut().parsed.push(feed.to_string());
        Ok(())
    }

    fn packages(&self) -> Vec<Package> {
        self.packages.clone()
    }

    fn strict_feed(&self) -> bool {
        self.strict
    }

    fn feed_root(&self) -> Option<PathBuf> {
        self.root.clone()
    }

    fn record_checksum(&mut self, name: &str, checksum: &str) {
        self.log
            .borrow_mut()
            .recorded
            .insert(name.to_string(), checksum.to_string());
    }

    fn read_only_packages(&self) -> Vec<String> {
        self.read_only.clone()
    }

    fn write_checksums(&mut self, _feed: &str) -> Result<()> {
        self.log.borrow_mut().writes += 1;
        Ok(())
    }
}

/// Serves local fixture archives for remote urls.
#[derive(Default)]
struct FixtureFetcher {
    archives: BTreeMap<String, PathBuf>,
}

impl FixtureFetcher {
    fn with(mut self, url: &str, archive: &Path) -> Self {
        self.archives.insert(url.to_string(), archive.to_path_buf());
        self
    }
}

impl Fetcher for FixtureFetcher {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let source = self
            .archives
            .get(url)
            .ok_or_else(|| anyhow!("no fixture for {url}"))?;
        let file_name = source
            .file_name()
            .ok_or_else(|| anyhow!("fixture without file name"))?;
        let dest = dest_dir.join(file_name);
        fs::copy(source, &dest)?;
        Ok(dest)
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        Err(anyhow!("unexpected fetch of {url}"))
    }
}

#[derive(Default)]
struct RecordingSvn {
    calls: RefCell<Vec<String>>,
}

impl SvnClient for RecordingSvn {
    fn checkout(&self, url: &str, revision: Option<&str>, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)?;
        self.calls.borrow_mut().push(format!(
            "checkout {url} {}",
            revision.unwrap_or("HEAD")
        ));
        Ok(())
    }

    fn update(&self, dest: &Path, revision: Option<&str>) -> Result<()> {
        self.calls.borrow_mut().push(format!(
            "update {} {}",
            dest.display(),
            revision.unwrap_or("HEAD")
        ));
        Ok(())
    }
}

fn transport<'a>(fetcher: &'a FixtureFetcher, svn: &'a RecordingSvn) -> UpdateTransport<'a> {
    UpdateTransport { fetcher, svn }
}

#[test]
fn update_installs_archive_package_under_packages_path() {
    let root = test_install_root();
    let archive = package_archive(
        &root,
        "b-1.0",
        Some(r#"<package name="B" version="1.0" toolchain_file="cmake/b.cmake"/>"#),
    );
    let checksum = sha512_file(&archive).expect("must hash fixture");
    let url = "https://example.test/b-1.0.tar.gz";
    let fetcher = FixtureFetcher::default().with(url, &archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));
    let mut feed = StaticFeed::new(
        vec![archive_package("B", "1.0", url, Some(&checksum))],
        &log,
    );

    let mut database = open_database(&root);
    let report = database
        .update(
            &mut feed,
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("update must succeed");

    assert_eq!(log.borrow().parsed, vec!["feed.xml"]);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.added[0].to_string(), "B 1.0");
    let install_dir = database.packages_path().join("B");
    assert!(install_dir.join("bin").join("tool").is_file());
    assert!(install_dir.join("package.xml").is_file());

    let reopened = open_database(&root);
    assert_eq!(reopened.packages().count(), 1);
    let installed = reopened.get_package("B").expect("B must be recorded");
    assert_eq!(installed.path.as_deref(), Some(install_dir.as_path()));
    assert_eq!(installed.checksum.as_deref(), Some(checksum.as_str()));
    assert_eq!(
        installed.toolchain_file.as_deref(),
        Some(install_dir.join("cmake/b.cmake").display().to_string().as_str())
    );
}

#[test]
fn checksum_mismatch_aborts_and_keeps_database_file() {
    let root = test_install_root();
    let local_dir = root.join("local-a");
    write_file(&local_dir.join("package.xml"), r#"<package name="A"/>"#);
    let archive = package_archive(&root, "b-1.0", None);
    let url = "https://example.test/b-1.0.tar.gz";
    let fetcher = FixtureFetcher::default().with(url, &archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));

    let mut package_a = Package::new("A");
    package_a.directory = Some(local_dir.display().to_string());
    let mut database = open_database(&root);
    database
        .update(
            &mut StaticFeed::new(vec![package_a.clone()], &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("first update must succeed");
    let before = fs::read(database.db_path()).expect("database file must exist");

    let mut feed = StaticFeed::new(
        vec![
            package_a,
            archive_package("B", "1.0", url, Some("00112233")),
        ],
        &log,
    );
    let err = database
        .update(
            &mut feed,
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect_err("bad checksum must fail");

    match err.downcast_ref::<ToolbenchError>() {
        Some(ToolbenchError::ChecksumMismatch {
            package, expected, ..
        }) => {
            assert_eq!(package, "B 1.0");
            assert_eq!(expected, "00112233");
        }
        other => panic!("unexpected error: {other:?} ({err:#})"),
    }
    let after = fs::read(database.db_path()).expect("database file must exist");
    assert_eq!(before, after);
    assert!(!database.packages_path().join("B").exists());
}

#[test]
fn changed_checksum_of_installed_package_fails_without_saving() {
    let root = test_install_root();
    let archive = package_archive(&root, "a-1.0", None);
    let checksum = sha512_file(&archive).expect("must hash fixture");
    let url = "https://example.test/a-1.0.tar.gz";
    let fetcher = FixtureFetcher::default().with(url, &archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));

    let mut database = open_database(&root);
    database
        .update(
            &mut StaticFeed::new(vec![archive_package("A", "1.0", url, Some(&checksum))], &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("first update must succeed");
    let before = fs::read(database.db_path()).expect("database file must exist");

    let err = database
        .update(
            &mut StaticFeed::new(vec![archive_package("A", "1.0", url, Some("ffff"))], &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect_err("changed checksum must fail");

    assert!(matches!(
        err.downcast_ref::<ToolbenchError>(),
        Some(ToolbenchError::ChecksumMismatch { .. })
    ));
    let after = fs::read(database.db_path()).expect("database file must exist");
    assert_eq!(before, after);
    let reopened = open_database(&root);
    assert_eq!(
        reopened
            .get_package("A")
            .expect("A must still be recorded")
            .checksum
            .as_deref(),
        Some(checksum.as_str())
    );
}

#[test]
fn update_checksums_overrides_and_writes_back() {
    let root = test_install_root();
    let archive = package_archive(&root, "b-1.0", None);
    let actual = sha512_file(&archive).expect("must hash fixture");
    let url = "https://example.test/b-1.0.tar.gz";
    let fetcher = FixtureFetcher::default().with(url, &archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));
    let mut feed = StaticFeed::new(vec![archive_package("B", "1.0", url, Some("bad"))], &log);

    let options = UpdateOptions {
        update_checksums: true,
        ..UpdateOptions::default()
    };
    let mut database = open_database(&root);
    let report = database
        .update(&mut feed, "feed.xml", &options, transport(&fetcher, &svn))
        .expect("update must succeed");

    assert!(report.checksums_updated.contains("B"));
    assert_eq!(log.borrow().recorded.get("B"), Some(&actual));
    assert_eq!(log.borrow().writes, 1);
    assert_eq!(
        database
            .get_package("B")
            .expect("B must be installed")
            .checksum
            .as_deref(),
        Some(actual.as_str())
    );
}

#[test]
fn update_checksums_is_refused_for_remote_feed_packages() {
    let root = test_install_root();
    let archive = package_archive(&root, "b-1.0", None);
    let url = "https://example.test/b-1.0.tar.gz";
    let fetcher = FixtureFetcher::default().with(url, &archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));
    let mut feed =
        StaticFeed::new(vec![archive_package("B", "1.0", url, Some("bad"))], &log).remote();

    let options = UpdateOptions {
        update_checksums: true,
        ..UpdateOptions::default()
    };
    let mut database = open_database(&root);
    let err = database
        .update(&mut feed, "https://example.test/feed.xml", &options, transport(&fetcher, &svn))
        .expect_err("remote checksums cannot be updated");

    assert!(err.to_string().contains("B declared by remote feeds"));
    assert!(database.find_package("B").is_none());
    assert!(!database.packages_path().join("B").exists());
    assert!(!database.db_path().exists());
    assert_eq!(log.borrow().writes, 0);
}

#[test]
fn version_change_replaces_installed_payload() {
    let root = test_install_root();
    write_file(&root.join("fixtures").join("a-1.0").join("share").join("v1.txt"), "1");
    write_file(&root.join("fixtures").join("a-2.0").join("share").join("v2.txt"), "2");
    let old_archive = package_archive(&root, "a-1.0", None);
    let new_archive = package_archive(&root, "a-2.0", None);
    let old_checksum = sha512_file(&old_archive).expect("must hash fixture");
    let new_checksum = sha512_file(&new_archive).expect("must hash fixture");
    let old_url = "https://example.test/a-1.0.tar.gz";
    let new_url = "https://example.test/a-2.0.tar.gz";
    let fetcher = FixtureFetcher::default()
        .with(old_url, &old_archive)
        .with(new_url, &new_archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));

    let mut database = open_database(&root);
    database
        .update(
            &mut StaticFeed::new(
                vec![archive_package("A", "1.0", old_url, Some(&old_checksum))],
                &log,
            ),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("first update must succeed");
    let install_dir = database.packages_path().join("A");
    assert!(install_dir.join("share").join("v1.txt").is_file());

    let report = database
        .update(
            &mut StaticFeed::new(
                vec![archive_package("A", "2.0", new_url, Some(&new_checksum))],
                &log,
            ),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("second update must succeed");

    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].to_string(), "A from 1.0 to 2.0");
    assert!(!report.updated[0].is_downgrade());
    assert!(report.added.is_empty());
    assert!(report.removed.is_empty());
    assert!(!install_dir.join("share").join("v1.txt").exists());
    assert!(install_dir.join("share").join("v2.txt").is_file());

    let reopened = open_database(&root);
    let installed = reopened.get_package("A").expect("A must be recorded");
    assert_eq!(installed.version.as_deref(), Some("2.0"));
    assert_eq!(installed.checksum.as_deref(), Some(new_checksum.as_str()));
    assert_eq!(installed.path.as_deref(), Some(install_dir.as_path()));
}

#[test]
fn undeclared_checksum_is_accepted_without_write_back() {
    let root = test_install_root();
    let archive = package_archive(&root, "b-1.0", None);
    let url = "https://example.test/b-1.0.tar.gz";
    let fetcher = FixtureFetcher::default().with(url, &archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));
    let mut feed = StaticFeed::new(vec![archive_package("B", "1.0", url, None)], &log);

    let mut database = open_database(&root);
    let report = database
        .update(
            &mut feed,
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("update must succeed");

    assert!(report.checksums_updated.is_empty());
    assert_eq!(log.borrow().writes, 0);
    assert!(database.find_package("B").is_some());
}

#[test]
fn packages_missing_from_feed_are_removed_with_their_directory() {
    let root = test_install_root();
    let mut database = open_database(&root);
    let install_dir = database.packages_path().join("C");
    write_file(&install_dir.join("lib").join("libc.so"), "");
    let mut package_c = Package::new("C").with_version("0.1");
    package_c.path = Some(install_dir.clone());
    database.add_package(package_c).expect("must add C");
    database.save().expect("must save");

    let fetcher = FixtureFetcher::default();
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));
    let report = database
        .update(
            &mut StaticFeed::new(Vec::new(), &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("update must succeed");

    assert_eq!(report.removed, vec!["C"]);
    assert!(!install_dir.exists());
    assert!(open_database(&root).find_package("C").is_none());
}

#[test]
fn removing_directory_package_keeps_its_sources() {
    let root = test_install_root();
    let local_dir = root.join("sources").join("d");
    write_file(&local_dir.join("package.xml"), r#"<package name="D"/>"#);
    let mut database = open_database(&root);
    database
        .install_local_package("D", &local_dir)
        .expect("must register directory");

    let removed = database.remove_package("D").expect("must remove D");
    assert_eq!(removed.name, "D");
    assert!(local_dir.join("package.xml").is_file());

    let err = database
        .remove_package("D")
        .expect_err("second removal must fail");
    assert_eq!(
        err.downcast_ref::<ToolbenchError>(),
        Some(&ToolbenchError::package_not_found("D"))
    );
}

#[test]
fn package_without_url_or_directory_is_rejected() {
    let root = test_install_root();
    let fetcher = FixtureFetcher::default();
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));
    let mut database = open_database(&root);

    let err = database
        .update(
            &mut StaticFeed::new(vec![Package::new("E").with_version("1")], &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect_err("sourceless package must fail");

    assert_eq!(
        err.downcast_ref::<ToolbenchError>(),
        Some(&ToolbenchError::MissingSource {
            package: "E".to_string()
        })
    );
}

#[test]
fn svn_packages_are_checked_out_then_updated() {
    let root = test_install_root();
    let mut package_s = Package::new("S");
    package_s.url = Some("svn://example.test/s".to_string());
    package_s.revision = Some("42".to_string());
    package_s.source = PackageSource::Svn;
    let fetcher = FixtureFetcher::default();
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));
    let mut database = open_database(&root);

    for _ in 0..2 {
        let report = database
            .update(
                &mut StaticFeed::new(vec![package_s.clone()], &log),
                "feed.xml",
                &UpdateOptions::default(),
                transport(&fetcher, &svn),
            )
            .expect("update must succeed");
        assert_eq!(report.svn, vec!["S"]);
        assert!(report.added.is_empty());
        assert!(report.updated.is_empty());
    }

    let dest = database.packages_path().join("S");
    assert_eq!(
        *svn.calls.borrow(),
        vec![
            "checkout svn://example.test/s 42".to_string(),
            format!("update {} 42", dest.display()),
        ]
    );
    let reopened = open_database(&root);
    let recorded = reopened.get_package("S").expect("S must be recorded");
    assert!(recorded.is_svn());
    assert_eq!(recorded.path.as_deref(), Some(dest.as_path()));
}

#[test]
fn svn_checkout_is_replaced_when_feed_switches_to_archive() {
    let root = test_install_root();
    let mut package_s = Package::new("S");
    package_s.url = Some("svn://example.test/s".to_string());
    package_s.source = PackageSource::Svn;
    let archive = package_archive(&root, "s-2.0", None);
    let checksum = sha512_file(&archive).expect("must hash fixture");
    let url = "https://example.test/s-2.0.tar.gz";
    let fetcher = FixtureFetcher::default().with(url, &archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));

    let mut database = open_database(&root);
    database
        .update(
            &mut StaticFeed::new(vec![package_s], &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("svn update must succeed");
    let dest = database.packages_path().join("S");
    write_file(&dest.join(".svn").join("entries"), "");

    let report = database
        .update(
            &mut StaticFeed::new(vec![archive_package("S", "2.0", url, Some(&checksum))], &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("archive update must succeed");

    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].to_string(), "S from subversion to 2.0");
    assert!(report.svn.is_empty());
    assert!(!dest.join(".svn").exists());
    assert!(dest.join("bin").join("tool").is_file());
    let reopened = open_database(&root);
    let recorded = reopened.get_package("S").expect("S must be recorded");
    assert!(!recorded.is_svn());
    assert_eq!(recorded.version.as_deref(), Some("2.0"));
}

#[test]
fn archive_package_switched_to_svn_is_checked_out_fresh() {
    let root = test_install_root();
    let archive = package_archive(&root, "s-1.0", None);
    let checksum = sha512_file(&archive).expect("must hash fixture");
    let url = "https://example.test/s-1.0.tar.gz";
    let fetcher = FixtureFetcher::default().with(url, &archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));

    let mut database = open_database(&root);
    database
        .update(
            &mut StaticFeed::new(vec![archive_package("S", "1.0", url, Some(&checksum))], &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("archive update must succeed");
    let dest = database.packages_path().join("S");
    assert!(dest.join("bin").join("tool").is_file());

    let mut package_s = Package::new("S");
    package_s.url = Some("svn://example.test/s".to_string());
    package_s.source = PackageSource::Svn;
    let report = database
        .update(
            &mut StaticFeed::new(vec![package_s], &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("svn update must succeed");

    assert_eq!(report.svn, vec!["S"]);
    assert_eq!(*svn.calls.borrow(), vec!["checkout svn://example.test/s HEAD"]);
    assert!(!dest.join("bin").join("tool").exists());
    assert!(open_database(&root)
        .get_package("S")
        .expect("S must be recorded")
        .is_svn());
}

#[test]
fn manifest_conflict_depends_on_feed_strictness() {
    let root = test_install_root();
    let archive = package_archive(
        &root,
        "b-1.0",
        Some(r#"<package name="B" version="2.0" target="linux64"/>"#),
    );
    let url = "https://example.test/b-1.0.tar.gz";
    let fetcher = FixtureFetcher::default().with(url, &archive);
    let svn = RecordingSvn::default();
    let log = Rc::new(RefCell::new(FeedLog::default()));
    let package_b = archive_package("B", "1.0", url, None);

    let mut strict = open_database(&root);
    let err = strict
        .update(
            &mut StaticFeed::new(vec![package_b.clone()], &log),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect_err("strict feed must reject conflicting manifest");
    assert!(matches!(
        err.downcast_ref::<ToolbenchError>(),
        Some(ToolbenchError::ManifestConflict { field: "version", .. })
    ));

    let mut lenient = open_database(&root);
    lenient
        .update(
            &mut StaticFeed::new(vec![package_b], &log).lenient(),
            "feed.xml",
            &UpdateOptions::default(),
            transport(&fetcher, &svn),
        )
        .expect("lenient feed must accept conflicting manifest");
    assert!(!lenient.strict_feed());
    let installed = lenient.get_package("B").expect("B must be installed");
    assert_eq!(installed.version.as_deref(), Some("1.0"));
    assert_eq!(installed.target.as_deref(), Some("linux64"));
}

#[test]
fn solve_deps_orders_installed_packages() {
    let root = test_install_root();
    let mut database = open_database(&root);
    for (name, manifest) in [
        (
            "app",
            r#"<package name="app"><depends buildtime="true" names="boost ghost"/></package>"#,
        ),
        (
            "boost",
            r#"<package name="boost"><depends runtime="true" names="zlib"/></package>"#,
        ),
        ("zlib", r#"<package name="zlib"/>"#),
    ] {
        let dir = root.join("sources").join(name);
        write_file(&dir.join("package.xml"), manifest);
        database
            .install_local_package(name, &dir)
            .expect("must register package");
    }

    let all = database
        .solve_deps(&["app"], &DependencyKinds::all())
        .expect("must solve");
    let names: Vec<&str> = all.iter().map(|package| package.name.as_str()).collect();
    assert_eq!(names, vec!["zlib", "boost", "app"]);

    let build_only = database
        .solve_deps(&["app"], &DependencyKinds::build())
        .expect("must solve");
    let names: Vec<&str> = build_only
        .iter()
        .map(|package| package.name.as_str())
        .collect();
    assert_eq!(names, vec!["boost", "app"]);
}

#[test]
fn install_local_archive_records_checksum() {
    let root = test_install_root();
    let archive = package_archive(&root, "z-1.2", Some(r#"<package name="zlib" version="1.2"/>"#));
    let mut database = open_database(&root);

    let installed = database
        .install_local_package("zlib", &archive)
        .expect("must install archive")
        .clone();

    assert_eq!(installed.version.as_deref(), Some("1.2"));
    assert_eq!(
        installed.checksum,
        Some(sha512_file(&archive).expect("must hash"))
    );
    assert_eq!(
        installed.path.as_deref(),
        Some(database.packages_path().join("zlib").as_path())
    );
    assert_eq!(
        database.package_path("zlib"),
        Some(database.packages_path().join("zlib").as_path())
    );
}

#[test]
fn removing_database_deletes_storage_and_file() {
    let root = test_install_root();
    let mut database = open_database(&root);
    let install_dir = database.packages_path().join("C");
    write_file(&install_dir.join("file"), "");
    let mut package = Package::new("C");
    package.path = Some(install_dir);
    database.add_package(package).expect("must add");
    database.save().expect("must save");
    let db_path = database.db_path().to_path_buf();
    let packages_path = database.packages_path().to_path_buf();

    database.remove().expect("must remove toolchain");
    assert!(!db_path.exists());
    assert!(!packages_path.exists());
}

#[test]
fn database_rejects_foreign_root_element() {
    let root = test_install_root();
    let layout = ToolbenchLayout::new(&root);
    write_file(&layout.database_path("linux64"), "<feed/>");

    let err = Database::open(&layout, "linux64").expect_err("wrong root must fail");
    assert!(err.to_string().contains("<toolchain>"));
}

fn names(packages: &[Package]) -> Vec<String> {
    packages.iter().map(|package| package.name.clone()).collect()
}

#[test]
fn plan_update_sorts_and_keeps_feed_svn_apart() {
    let mut local = BTreeMap::new();
    for package in [
        Package::new("zlib").with_version("1.2"),
        Package::new("boost").with_version("1.80"),
        Package::new("old").with_version("1"),
        {
            let mut svn = Package::new("tools");
            svn.source = PackageSource::Svn;
            svn
        },
    ] {
        local.insert(package.name.clone(), package);
    }
    let mut remote_svn = Package::new("assets");
    remote_svn.source = PackageSource::Svn;
    let mut tools_archive = Package::new("tools").with_version("2");
    tools_archive.url = Some("https://example.test/tools.tar.gz".to_string());
    let remote = vec![
        Package::new("zlib").with_version("1.3"),
        Package::new("boost").with_version("1.80"),
        Package::new("gtest").with_version("1.14"),
        Package::new("abseil").with_version("2024"),
        remote_svn,
        tools_archive,
    ];

    let plan = plan_update(&local, &remote, false);
    assert_eq!(plan.to_remove, vec!["old"]);
    assert_eq!(names(&plan.to_update), vec!["tools", "zlib"]);
    assert_eq!(names(&plan.to_add), vec!["abseil", "gtest"]);
    assert_eq!(names(&plan.svn), vec!["assets"]);
    assert_eq!(plan.to_update[1].version.as_deref(), Some("1.3"));

    let forced = plan_update(&local, &remote, true);
    assert_eq!(names(&forced.to_update), vec!["boost", "tools", "zlib"]);
}

#[test]
fn plan_update_is_empty_when_in_sync() {
    let mut local = BTreeMap::new();
    local.insert("zlib".to_string(), Package::new("zlib").with_version("1.2"));
    let plan = plan_update(&local, &[Package::new("zlib").with_version("1.2")], false);
    assert!(plan.is_empty());
}

#[test]
fn package_change_display() {
    let old = Package::new("zlib").with_version("1.2.13");
    let new = Package::new("zlib").with_version("1.3");
    let change = PackageChange::replacing(&old, &new);
    assert_eq!(change.to_string(), "zlib from 1.2.13 to 1.3");
    assert!(!change.is_downgrade());
    assert!(PackageChange::replacing(&new, &old).is_downgrade());

    let mut checkout = Package::new("zlib");
    checkout.source = PackageSource::Svn;
    assert_eq!(
        PackageChange::replacing(&checkout, &new).to_string(),
        "zlib from subversion to 1.3"
    );
    assert_eq!(PackageChange::added(&new).to_string(), "zlib 1.3");
    assert_eq!(PackageChange::added(&Package::new("zlib")).to_string(), "zlib");
}

#[test]
fn extraction_unwraps_single_top_level_directory() {
    let root = test_install_root();
    let archive = package_archive(&root, "pkg-1.0", None);
    let dest = root.join("out");
    write_file(&dest.join("stale"), "");

    extract_archive(&archive, ArchiveType::TarGz, &dest, &root.join("scratch"))
        .expect("must extract");

    assert!(dest.join("bin").join("tool").is_file());
    assert!(!dest.join("pkg-1.0").exists());
    assert!(!dest.join("stale").exists());
}

#[test]
fn layout_paths_hang_off_prefix() {
    let layout = ToolbenchLayout::new("/opt/toolbench");
    assert_eq!(
        layout.database_path("linux64"),
        PathBuf::from("/opt/toolbench/toolchains/linux64.xml")
    );
    assert_eq!(
        layout.packages_dir("linux64"),
        PathBuf::from("/opt/toolbench/toolchains/linux64")
    );
    assert_eq!(
        layout.feed_cache_path("linux64"),
        PathBuf::from("/opt/toolbench/cache/feeds/linux64")
    );
    assert_eq!(
        resolve_prefix(Some(Path::new("/srv/tb"))).expect("explicit prefix wins"),
        PathBuf::from("/srv/tb")
    );
}

#[test]
fn ensure_base_dirs_creates_layout() {
    let root = test_install_root();
    let layout = ToolbenchLayout::new(root.join("prefix"));
    layout.ensure_base_dirs().expect("must create dirs");
    assert!(layout.toolchains_dir().is_dir());
    assert!(layout.tmp_state_dir().is_dir());
    assert!(layout.feeds_cache_dir().is_dir());
}

//! End-to-end tests for the strip, assemble and index chain.

mod support;

use camino::Utf8Path;
use filetime::{FileTime, set_file_mtime};
use pkgseal_common::SourceDateEpoch;
use pkgseal_publisher::assemble::AssembleOutcome;
use pkgseal_publisher::error::{PublishError, Result};
use pkgseal_publisher::package::PackageInfo;
use pkgseal_publisher::pipeline::{PipelineContext, run_post_build};
use pkgseal_publisher::strip::{ElfHeader, ElfInspector, ElfMap};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use support::{Distribution, FAKE_SIGNATURE, TarballWriter, fake_tools, tar_members};

const DEFINITION: &str = r#"
pkgname = "foo"
version = "1.0"
revision = 1
short_desc = "foo library"
destdir = "destdir/foo-1.0"
depends = ["musl"]
"#;

/// Inspector for trees without dynamic objects.
struct NoDynamicObjects;

impl ElfInspector for NoDynamicObjects {
    fn inspect(&self, _path: &Utf8Path, relative: &Utf8Path) -> Result<ElfHeader> {
        Err(PublishError::InvalidElfProbe {
            path: relative.to_owned(),
            output: "unexpected probe".to_owned(),
        })
    }
}

fn staged_distribution() -> (Distribution, PackageInfo) {
    let dist = Distribution::new().with_key("me.rsa");
    let definition = dist.write("srcpkgs/foo/package.toml", DEFINITION.as_bytes());
    set_file_mtime(&definition, FileTime::from_unix_time(1_600_000_000, 0)).expect("set mtime");
    dist.write("srcpkgs/foo/destdir/foo-1.0/usr/lib/libfoo.a", b"!<arch>\nobject");
    dist.write("srcpkgs/foo/destdir/foo-1.0/usr/share/doc/foo/README", b"docs");
    let package = PackageInfo::load(&definition).expect("load definition");
    (dist, package)
}

#[test]
fn staged_package_is_published_into_a_signed_index() {
    let (dist, mut package) = staged_distribution();
    let tools = fake_tools();
    let ctx = PipelineContext {
        lock_poll: Duration::from_millis(10),
        ..PipelineContext::new(&dist.config, &tools, SourceDateEpoch::new(1_700_000_000))
    };

    let report = run_post_build(
        &ctx,
        &mut package,
        &ElfMap::default(),
        &NoDynamicObjects,
        &TarballWriter,
    )
    .expect("publish");

    let repo = dist.root.join("packages/main/x86_64");
    let archive = repo.join("foo-1.0-r1.apk");
    assert_eq!(report.main, AssembleOutcome::Created(archive.clone()));
    assert!(report.debug.is_none());
    assert!(!repo.join("foo-1.0-r1.apk.lock").exists());

    let library = package.destdir.join("usr/lib/libfoo.a");
    let mode = fs::metadata(&library).expect("metadata").permissions().mode() & 0o777;
    assert_eq!(mode, 0o644);

    let members = tar_members(&archive);
    assert_eq!(members[0].0, ".PKGINFO");
    assert!(String::from_utf8_lossy(&members[0].1).contains("pkgname = foo"));

    assert!(!repo.join("APKINDEX.unsigned.tar.gz").exists());
    let index = tar_members(&repo.join("APKINDEX.tar.gz"));
    assert_eq!(
        index,
        [
            (".SIGN.RSA.me.rsa.pub".to_owned(), FAKE_SIGNATURE.to_vec()),
            ("APKINDEX".to_owned(), b"P:foo-1.0-r1.apk\n".to_vec()),
        ]
    );

    let programs: Vec<String> = tools
        .calls()
        .iter()
        .map(|call| call.program().to_owned())
        .collect();
    assert_eq!(programs, ["strip", "apk", "openssl"]);
}

#[test]
fn republishing_a_fresh_package_leaves_the_index_alone() {
    let (dist, mut package) = staged_distribution();
    let tools = fake_tools();
    let ctx = PipelineContext {
        lock_poll: Duration::from_millis(10),
        ..PipelineContext::new(&dist.config, &tools, SourceDateEpoch::new(1_700_000_000))
    };
    let elfs = ElfMap::default();

    run_post_build(&ctx, &mut package, &elfs, &NoDynamicObjects, &TarballWriter).expect("first run");
    let index = dist.root.join("packages/main/x86_64/APKINDEX.tar.gz");
    let first_index = fs::read(&index).expect("read index");
    let calls_after_first = tools.calls().len();

    let report = run_post_build(&ctx, &mut package, &elfs, &NoDynamicObjects, &TarballWriter)
        .expect("second run");

    assert!(matches!(report.main, AssembleOutcome::AlreadyFresh(_)));
    assert!(report.updated_dirs().is_empty());
    assert_eq!(fs::read(&index).expect("read index"), first_index);
    let later: Vec<String> = tools.calls()[calls_after_first..]
        .iter()
        .map(|call| call.program().to_owned())
        .collect();
    assert_eq!(later, ["strip"]);
}

#[test]
fn missing_signing_key_aborts_after_assembly() {
    let (mut dist, mut package) = staged_distribution();
    dist.config.signing.key = Some("absent.rsa".to_owned());
    let tools = fake_tools();
    let ctx = PipelineContext {
        lock_poll: Duration::from_millis(10),
        ..PipelineContext::new(&dist.config, &tools, SourceDateEpoch::new(1_700_000_000))
    };

    let err = run_post_build(
        &ctx,
        &mut package,
        &ElfMap::default(),
        &NoDynamicObjects,
        &TarballWriter,
    )
    .expect_err("key is missing");

    assert!(matches!(err, PublishError::MissingKey { .. }));
    let repo = dist.root.join("packages/main/x86_64");
    assert!(repo.join("foo-1.0-r1.apk").is_file());
    assert!(!repo.join("APKINDEX.tar.gz").exists());
}

//! Test support utilities for publisher integration tests.
//!
//! Provides a temporary distribution layout, an archive writer producing
//! small gzip-compressed tarballs, and a scripted stand-in for the external
//! tools that materializes the files `apk index` and `openssl` would write.

#![allow(dead_code, reason = "each integration test uses a subset")]

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pkgseal_common::test_support::{ScriptedExecutor, stdout_output, success_output};
use pkgseal_publisher::assemble::{ArchiveRequest, ArchiveWriter};
use pkgseal_publisher::config::PublishConfig;
use pkgseal_publisher::error::Result;
use std::fs;
use std::io::{Read, Write};
use tempfile::TempDir;

/// Signature bytes returned by the fake `openssl`.
pub const FAKE_SIGNATURE: &[u8] = b"fake-rsa-signature";

/// A temporary distribution tree with a repository and key directory.
pub struct Distribution {
    _guard: TempDir,
    /// Root of the temporary tree.
    pub root: Utf8PathBuf,
    /// Configuration pointing into the tree.
    pub config: PublishConfig,
}

impl Distribution {
    /// Creates an empty tree with an unsigned configuration.
    pub fn new() -> Self {
        let guard = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::try_from(guard.path().to_path_buf()).expect("utf8 temp dir");
        let mut config = PublishConfig::default();
        config.paths.distdir = root.clone();
        config.paths.repository = root.join("packages");
        config.paths.statedir = root.join("state");
        Self {
            _guard: guard,
            root,
            config,
        }
    }

    /// Installs a private key under `etc/keys` and configures it.
    pub fn with_key(mut self, name: &str) -> Self {
        let keys = self.root.join("etc/keys");
        fs::create_dir_all(&keys).expect("mkdir keys");
        fs::write(keys.join(name), "PRIVATE KEY").expect("write key");
        self.config.signing.key = Some(name.to_owned());
        self
    }

    /// Writes a file below the tree, creating parent directories.
    pub fn write(&self, relative: &str, contents: &[u8]) -> Utf8PathBuf {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir parent");
        fs::write(&path, contents).expect("write file");
        path
    }
}

/// Builds a gzip-compressed tar holding `members`.
pub fn tar_gz(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in members {
        let mut header = tar::Header::new_ustar();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *data)
            .expect("append member");
    }
    let tar = builder.into_inner().expect("finish tar");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).expect("compress");
    encoder.finish().expect("finish gzip")
}

/// Lists `(name, contents)` of every member of a possibly concatenated
/// gzip-compressed tar.
pub fn tar_members(path: &Utf8Path) -> Vec<(String, Vec<u8>)> {
    let bytes = fs::read(path).expect("read archive");
    let mut archive = tar::Archive::new(MultiGzDecoder::new(bytes.as_slice()));
    archive
        .entries()
        .expect("entries")
        .map(|entry| {
            let mut entry = entry.expect("entry");
            let name = entry.path().expect("path").to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).expect("read member");
            (name, data)
        })
        .collect()
}

/// Archive writer producing a tarball with a `.PKGINFO` member.
#[derive(Debug, Default)]
pub struct TarballWriter;

impl ArchiveWriter for TarballWriter {
    fn write(&self, request: &ArchiveRequest) -> Result<()> {
        let info = format!(
            "pkgname = {}\npkgver = {}\narch = {}\n",
            request.pkgname, request.version_release, request.arch
        );
        fs::write(&request.output, tar_gz(&[(".PKGINFO", info.as_bytes())]))?;
        Ok(())
    }
}

/// Stands in for `strip`, `objcopy`, `apk index` and `openssl`.
///
/// `apk index` writes an index listing the archives it was given to its
/// `--output` file; `openssl` answers with [`FAKE_SIGNATURE`].
pub fn fake_tools() -> ScriptedExecutor {
    ScriptedExecutor::new(|command| match command.program() {
        "apk" => {
            let args = command.arguments();
            let output = args
                .iter()
                .position(|arg| arg == "--output")
                .and_then(|at| args.get(at + 1))
                .expect("index output");
            let listing: String = args
                .iter()
                .filter(|arg| arg.ends_with(".apk"))
                .map(|name| format!("P:{name}\n"))
                .collect();
            let dir = command.working_dir().expect("index runs in repository");
            fs::write(dir.join(output), tar_gz(&[("APKINDEX", listing.as_bytes())]))?;
            Ok(success_output())
        }
        "openssl" => Ok(stdout_output(FAKE_SIGNATURE)),
        _ => Ok(success_output()),
    })
}

//! Repository index maintenance.
//!
//! A repository directory may hold several archives of the same package.
//! [`scan`] decides which one is current: the newest by modification time,
//! with the apk version order breaking exact ties. [`prune`] deletes the
//! superseded archives and [`IndexBuilder::build_index`] regenerates the
//! index from the current ones, signing it when a key is configured.

pub mod naming;


use camino::{Utf8Path, Utf8PathBuf};
use pkgseal_common::{
    CommandExecutor, SOURCE_DATE_EPOCH, SourceDateEpoch, ToolCommand, compare_versions, run_checked,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs::{self, File, Permissions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::time::SystemTime;
use tempfile::NamedTempFile;

pub use naming::ArchiveName;

use crate::assemble::writer::DEFAULT_PATH;
use crate::config::ToolsConfig;
use crate::error::{PublishError, Result};
use crate::package::ARCHIVE_EXTENSION;
use crate::sign::{SignInput, Signer};

/// File name of the published index.
pub const INDEX_FILE: &str = "APKINDEX.tar.gz";

/// File name of the index before signing.
pub const UNSIGNED_INDEX_FILE: &str = "APKINDEX.unsigned.tar.gz";

/// Chunk size used when appending the unsigned index to its signature.
pub const INDEX_COPY_CHUNK: usize = 16 * 1024;

/// A timestamp-based choice that went to a lower version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionAnomaly {
    /// The archive that was displaced.
    pub from: String,
    /// The newer archive with the lower version.
    pub to: String,
}

/// Result of [`scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoScan {
    /// One current archive per package, sorted by package name.
    pub keep: Vec<String>,
    /// Every superseded archive.
    pub obsolete: Vec<String>,
    /// Archive files whose names could not be parsed.
    pub malformed: Vec<String>,
    /// Newer archives that carry a lower version than what they replaced.
    pub anomalies: Vec<VersionAnomaly>,
}

struct Candidate {
    mtime: SystemTime,
    file_name: String,
    version_release: String,
}

/// Partitions the archives directly inside `dir` into current and obsolete.
///
/// Files are processed in name order. Entries whose names are not UTF-8 and
/// archives that vanish or dangle before they can be examined are skipped.
/// Unless `quiet`, skipped entries, malformed names and version anomalies
/// are logged as warnings.
///
/// # Errors
///
/// Returns an error when the directory or an existing file's metadata
/// cannot be read.
pub fn scan(dir: &Utf8Path, quiet: bool) -> Result<RepoScan> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(PublishError::io_at(dir))? {
        let entry = entry.map_err(PublishError::io_at(dir))?;
        let file_name = match entry.file_name().into_string() {
            Ok(file_name) => file_name,
            Err(raw) => {
                if !quiet {
                    log::warn!(
                        "non-UTF-8 file name found, skipping: {}",
                        raw.to_string_lossy()
                    );
                }
                continue;
            }
        };
        if Utf8Path::new(&file_name).extension() == Some(ARCHIVE_EXTENSION) {
            let path = dir.join(&file_name);
            files.push((file_name, path));
        }
    }
    files.sort();

    let mut result = RepoScan::default();
    let mut current: BTreeMap<String, Candidate> = BTreeMap::new();

    for (file_name, path) in files {
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if !quiet {
                    log::warn!("unreadable archive entry, skipping: {file_name}");
                }
                continue;
            }
            Err(err) => return Err(PublishError::io_at(&path)(err)),
        };
        if !metadata.is_file() {
            continue;
        }
        let parsed = ArchiveName::parse(&file_name)
            .map(|name| (name.name.to_owned(), name.version_release.to_owned()));
        let Some((name, version_release)) = parsed else {
            if !quiet {
                log::warn!("malformed file name found, skipping: {file_name}");
            }
            result.malformed.push(file_name);
            continue;
        };
        let candidate = Candidate {
            mtime: metadata.modified().map_err(PublishError::io_at(&path))?,
            file_name,
            version_release,
        };

        let previous = match current.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
                continue;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        let (winner_is_new, by_time) = match candidate.mtime.cmp(&previous.mtime) {
            Ordering::Greater => (true, true),
            Ordering::Less => (false, true),
            Ordering::Equal => (
                compare_versions(&candidate.version_release, &previous.version_release)
                    == Ordering::Greater,
                false,
            ),
        };
        let (winner, loser) = if winner_is_new {
            let loser = std::mem::replace(previous, candidate);
            (&*previous, loser)
        } else {
            (&*previous, candidate)
        };

        if by_time && compare_versions(&winner.version_release, &loser.version_release) == Ordering::Less {
            if !quiet {
                log::warn!(
                    "using lower version ({} => {}): newer timestamp",
                    loser.file_name,
                    winner.file_name
                );
            }
            result.anomalies.push(VersionAnomaly {
                from: loser.file_name.clone(),
                to: winner.file_name.clone(),
            });
        }
        result.obsolete.push(loser.file_name);
    }

    result.keep = current.into_values().map(|c| c.file_name).collect();
    Ok(result)
}

/// Deletes every obsolete archive under `<root>/<arch>`.
///
/// Returns the deleted file names; a missing directory is not an error.
///
/// # Errors
///
/// Returns an error when the scan fails or an archive cannot be removed.
pub fn prune(root: &Utf8Path, arch: &str) -> Result<Vec<String>> {
    let dir = root.join(arch);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    log::info!("pruning old packages: {dir}");
    let snapshot = scan(&dir, true)?;
    for file_name in &snapshot.obsolete {
        log::info!("pruning: {file_name}");
        let path = dir.join(file_name);
        fs::remove_file(&path).map_err(PublishError::io_at(&path))?;
    }
    log::info!("repo cleanup complete, {} package(s) kept", snapshot.keep.len());
    Ok(snapshot.obsolete)
}

/// Parameters of one index build.
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions<'a> {
    /// Timestamp embedded in the index and its signature.
    pub epoch: SourceDateEpoch,
    /// Private key; without one the index is marked untrusted.
    pub signing_key: Option<&'a Utf8Path>,
    /// Architecture passed to the index tool.
    pub arch: Option<&'a str>,
    /// Extra repositories passed to the index tool.
    pub repositories: &'a [Utf8PathBuf],
}

/// Runs `apk index` and signs its output.
pub struct IndexBuilder<'a> {
    executor: &'a dyn CommandExecutor,
    apk: &'a str,
    signer: Signer<'a>,
    path: String,
}

impl<'a> IndexBuilder<'a> {
    /// Creates a builder using the tool names from `tools`.
    ///
    /// The child's `PATH` is taken from the current process.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, tools: &'a ToolsConfig) -> Self {
        let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_owned());
        Self {
            executor,
            apk: &tools.apk,
            signer: Signer::new(executor, &tools.openssl),
            path,
        }
    }

    /// Overrides the `PATH` handed to the index tool.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Rebuilds the index of `dir` from its current archives.
    ///
    /// Without a signing key the tool writes [`INDEX_FILE`] directly. With
    /// one, it writes [`UNSIGNED_INDEX_FILE`], whose signature container and
    /// contents then replace [`INDEX_FILE`] atomically before the unsigned
    /// file is removed.
    ///
    /// # Errors
    ///
    /// Returns an error when scanning, the index tool, signing or writing
    /// the final index fails.
    pub fn build_index(&self, dir: &Utf8Path, options: &IndexOptions<'_>) -> Result<()> {
        let mut command = ToolCommand::new(self.apk)
            .args(["index", "--quiet", "--repositories-file", "/dev/null"])
            .current_dir(dir)
            .clear_env()
            .env("PATH", &self.path)
            .env(SOURCE_DATE_EPOCH, options.epoch.to_string());
        if dir.join(INDEX_FILE).is_file() {
            command = command.args(["--index", INDEX_FILE]);
        }
        command = match options.signing_key {
            None => command.args(["--allow-untrusted", "--output", INDEX_FILE]),
            Some(_) => command.args(["--output", UNSIGNED_INDEX_FILE]),
        };
        for repository in options.repositories {
            command = command.arg("--repository").arg_path(repository);
        }
        if let Some(arch) = options.arch {
            command = command.args(["--arch", arch]);
        }
        command = command.args(scan(dir, false)?.keep);

        run_checked(self.executor, &command)
            .map_err(|source| PublishError::tool("index", dir, source))?;

        let Some(key) = options.signing_key else {
            log::info!("index built (untrusted): {}", dir.join(INDEX_FILE));
            return Ok(());
        };

        let unsigned = dir.join(UNSIGNED_INDEX_FILE);
        let signature = self
            .signer
            .sign(key, SignInput::File(&unsigned), options.epoch)?;
        write_signed_index(dir, &signature, &unsigned)?;
        fs::remove_file(&unsigned).map_err(PublishError::io_at(&unsigned))?;
        log::info!("index built and signed: {}", dir.join(INDEX_FILE));
        Ok(())
    }
}

/// Writes `signature` followed by the unsigned index into a temporary file
/// in `dir` and renames it over [`INDEX_FILE`].
fn write_signed_index(dir: &Utf8Path, signature: &[u8], unsigned: &Utf8Path) -> Result<()> {
    let target = dir.join(INDEX_FILE);
    let mut staged = NamedTempFile::new_in(dir).map_err(PublishError::io_at(dir))?;
    let mut input = File::open(unsigned).map_err(PublishError::io_at(unsigned))?;

    staged
        .write_all(signature)
        .map_err(PublishError::io_at(&target))?;
    let mut chunk = vec![0u8; INDEX_COPY_CHUNK];
    loop {
        let read = input.read(&mut chunk).map_err(PublishError::io_at(unsigned))?;
        if read == 0 {
            break;
        }
        staged
            .write_all(chunk.get(..read).unwrap_or_default())
            .map_err(PublishError::io_at(&target))?;
    }
    staged.as_file().sync_all().map_err(PublishError::io_at(&target))?;
    fs::set_permissions(staged.path(), Permissions::from_mode(0o644))
        .map_err(PublishError::io_at(&target))?;
    staged
        .persist(&target)
        .map_err(|err| PublishError::io_at(&target)(err.error))?;
    Ok(())
}

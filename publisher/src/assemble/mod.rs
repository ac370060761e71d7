//! Lock-guarded archive assembly.
//!
//! [`assemble`] turns one staged root into one archive in a repository
//! directory. Assemblies for the same archive path are serialized through an
//! [`ArchiveLock`]; an archive newer than its package definition is kept
//! unless the build is forced. The container itself is produced by an
//! [`ArchiveWriter`].

pub mod lock;
pub mod metadata;
pub mod writer;


use camino::{Utf8Path, Utf8PathBuf};
use pkgseal_common::SourceDateEpoch;
use std::fs;
use std::time::Duration;

pub use lock::{ArchiveLock, LOCK_POLL_INTERVAL};
pub use metadata::{MetadataValue, PackageMetadata};
pub use writer::{ApkMkpkgWriter, ArchiveRequest, ArchiveWriter};

use crate::error::{PublishError, Result};
use crate::package::{DEBUG_SUFFIX, HookScripts, PackageInfo};

/// One archive to assemble.
#[derive(Debug, Clone)]
pub struct AssembleRequest<'a> {
    /// Package the archive belongs to.
    pub package: &'a PackageInfo,
    /// Repository directory receiving the archive.
    pub repo_dir: Utf8PathBuf,
    /// Target architecture.
    pub arch: &'a str,
    /// File name of the archive.
    pub archive_name: String,
    /// Staged root to package.
    pub staged_dir: Utf8PathBuf,
    /// Whether this is the `-dbg` archive.
    pub debug: bool,
    /// Timestamp for every embedded mtime.
    pub epoch: SourceDateEpoch,
    /// Scratch directory for the writer.
    pub state_dir: &'a Utf8Path,
    /// Private key to sign the archive with.
    pub signing_key: Option<&'a Utf8Path>,
    /// Lifecycle scripts of the package.
    pub hooks: &'a HookScripts,
    /// Interval between lock attempts.
    pub lock_poll: Duration,
}

/// What [`assemble`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleOutcome {
    /// The archive was written.
    Created(Utf8PathBuf),
    /// The staged directory does not exist; nothing was written.
    MissingStagedDir,
    /// An archive newer than the package definition already exists.
    AlreadyFresh(Utf8PathBuf),
}

/// Assembles one archive.
///
/// # Errors
///
/// Returns an error when the repository directory or lock cannot be
/// created, the definition's mtime cannot be read, or the writer fails. The
/// lock is released in every case.
pub fn assemble(request: &AssembleRequest<'_>, writer: &dyn ArchiveWriter) -> Result<AssembleOutcome> {
    if !request.staged_dir.is_dir() {
        log::warn!(
            "cannot find staged directory {} for {}, skipping",
            request.staged_dir,
            request.archive_name
        );
        return Ok(AssembleOutcome::MissingStagedDir);
    }

    fs::create_dir_all(&request.repo_dir).map_err(PublishError::io_at(&request.repo_dir))?;
    let archive = request.repo_dir.join(&request.archive_name);
    let _lock = ArchiveLock::acquire(&archive, request.lock_poll)?;

    if !request.package.force && is_fresh(&archive, request.package)? {
        log::warn!("fresh archive {archive} already exists, skipping");
        return Ok(AssembleOutcome::AlreadyFresh(archive));
    }

    let package = request.package;
    let pkgname = if request.debug {
        format!("{}{DEBUG_SUFFIX}", package.pkgname)
    } else {
        package.pkgname.clone()
    };
    let archive_request = ArchiveRequest {
        pkgname,
        version_release: package.version_release(),
        arch: request.arch.to_owned(),
        epoch: request.epoch,
        staged_root: request.staged_dir.clone(),
        state_dir: request.state_dir.to_owned(),
        output: archive.clone(),
        signing_key: request.signing_key.map(Utf8Path::to_owned),
        metadata: PackageMetadata::for_archive(package, request.debug, request.hooks),
        hooks: if request.debug {
            HookScripts::default()
        } else {
            request.hooks.clone()
        },
    };

    log::info!("Creating {} in repository {}", request.archive_name, request.repo_dir);
    writer.write(&archive_request)?;
    Ok(AssembleOutcome::Created(archive))
}

fn is_fresh(archive: &Utf8Path, package: &PackageInfo) -> Result<bool> {
    let archive_mtime = match archive.metadata() {
        Ok(meta) if meta.is_file() => meta.modified().map_err(PublishError::io_at(archive))?,
        Ok(_) => return Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(PublishError::io_at(archive)(err)),
    };
    Ok(archive_mtime > package.definition_mtime()?)
}

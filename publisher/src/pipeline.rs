//! Publishing pipeline orchestration.
//!
//! This module ties the subsystems together for one package: the strip pass
//! over its staged tree, assembly of the main and debug archives into their
//! repository directories, and regeneration of the indexes of every
//! directory that received a new archive.

use camino::{Utf8Path, Utf8PathBuf};
use pkgseal_common::{CommandExecutor, SourceDateEpoch};
use std::time::Duration;

use crate::assemble::{AssembleOutcome, AssembleRequest, ArchiveWriter, LOCK_POLL_INTERVAL, assemble};
use crate::config::PublishConfig;
use crate::error::{PublishError, Result};
use crate::package::{HookScripts, PackageInfo};
use crate::repo::{IndexBuilder, IndexOptions};
use crate::sign::resolve_key_path;
use crate::strip::{
    Binutils, ElfInspector, ElfMap, StripContext, StripPolicy, StripReport, strip_package,
};

/// Shared state of one pipeline run.
pub struct PipelineContext<'a> {
    /// Loaded configuration.
    pub config: &'a PublishConfig,
    /// Runs every external tool.
    pub executor: &'a dyn CommandExecutor,
    /// Timestamp embedded in archives, indexes and signatures.
    pub epoch: SourceDateEpoch,
    /// Interval between archive lock attempts.
    pub lock_poll: Duration,
}

impl<'a> PipelineContext<'a> {
    /// Creates a context polling archive locks every [`LOCK_POLL_INTERVAL`].
    #[must_use]
    pub fn new(
        config: &'a PublishConfig,
        executor: &'a dyn CommandExecutor,
        epoch: SourceDateEpoch,
    ) -> Self {
        Self {
            config,
            executor,
            epoch,
            lock_poll: LOCK_POLL_INTERVAL,
        }
    }

    /// Returns the resolved signing key, when one is configured.
    #[must_use]
    pub fn signing_key(&self) -> Option<Utf8PathBuf> {
        self.config
            .signing
            .key
            .as_deref()
            .map(|key| resolve_key_path(Utf8Path::new(key), &self.config.paths.distdir))
    }

    /// Returns the repository directory receiving `package`'s main or debug
    /// archive.
    #[must_use]
    pub fn repository_dir(&self, package: &PackageInfo, debug: bool) -> Utf8PathBuf {
        let root = self.config.paths.repository.join(&package.repository);
        let root = if debug { root.join("debug") } else { root };
        root.join(&self.config.build.arch)
    }
}

/// Archives produced for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Outcome for the main archive.
    pub main: AssembleOutcome,
    /// Outcome for the debug archive; `None` when it was not attempted.
    pub debug: Option<AssembleOutcome>,
}

impl PublishReport {
    /// Directories that received a newly written archive.
    #[must_use]
    pub fn updated_dirs(&self) -> Vec<Utf8PathBuf> {
        [Some(&self.main), self.debug.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|outcome| match outcome {
                AssembleOutcome::Created(archive) => archive.parent().map(Utf8Path::to_owned),
                AssembleOutcome::MissingStagedDir | AssembleOutcome::AlreadyFresh(_) => None,
            })
            .collect()
    }
}

/// Picks the reproducibility epoch: an explicit value, then
/// `SOURCE_DATE_EPOCH`, then the mtime of `fallback`.
///
/// # Errors
///
/// Returns an error when the fallback's metadata is needed but unreadable.
pub fn resolve_epoch(
    explicit: Option<SourceDateEpoch>,
    fallback: &Utf8Path,
) -> Result<SourceDateEpoch> {
    if let Some(epoch) = explicit.or_else(SourceDateEpoch::from_env) {
        return Ok(epoch);
    }
    SourceDateEpoch::from_mtime(fallback).map_err(PublishError::io_at(fallback))
}

/// Fills unset shared-library lists of `package` from the ELF map.
pub fn fill_shared_libraries(package: &mut PackageInfo, elfs: &ElfMap) {
    if package.shlib_provides.is_none() {
        let provides = elfs.shlib_provides();
        if !provides.is_empty() {
            package.shlib_provides = Some(provides);
        }
    }
    if package.shlib_requires.is_none() {
        let requires = elfs.shlib_requires();
        if !requires.is_empty() {
            package.shlib_requires = Some(requires);
        }
    }
}

/// Runs the strip pass over `package`'s staged tree.
///
/// # Errors
///
/// Returns the first policy, classification or tool failure.
pub fn strip_staged(
    ctx: &PipelineContext<'_>,
    package: &PackageInfo,
    elfs: &ElfMap,
    inspector: &dyn ElfInspector,
) -> Result<StripReport> {
    let policy = StripPolicy::for_package(package, &ctx.config.build)?;
    let debug_destdir = package.debug_destdir();
    let strip_ctx = StripContext {
        destdir: &package.destdir,
        debug_destdir: &debug_destdir,
        elfs,
        policy: &policy,
        inspector,
        tools: Binutils::new(ctx.executor, &ctx.config.tools),
    };
    strip_package(&strip_ctx)
}

/// Assembles the main archive and, when a debug tree was produced, the debug
/// archive of `package`.
///
/// The debug archive is skipped when the template declares its own `-dbg`
/// subpackage or debug packages are disabled.
///
/// # Errors
///
/// Returns the first assembly failure; the main archive is kept when the
/// debug archive fails.
pub fn publish_package(
    ctx: &PipelineContext<'_>,
    package: &PackageInfo,
    writer: &dyn ArchiveWriter,
) -> Result<PublishReport> {
    let hooks = package.hook_scripts();
    let signing_key = ctx.signing_key();
    let target = ArchiveTarget {
        package,
        hooks: &hooks,
        signing_key: signing_key.as_deref(),
    };

    let main = assemble(&target.request(ctx, false), writer)?;
    let debug = if wants_debug_archive(ctx, package) {
        Some(assemble(&target.request(ctx, true), writer)?)
    } else {
        None
    };
    Ok(PublishReport { main, debug })
}

struct ArchiveTarget<'a> {
    package: &'a PackageInfo,
    hooks: &'a HookScripts,
    signing_key: Option<&'a Utf8Path>,
}

impl<'a> ArchiveTarget<'a> {
    fn request(&self, ctx: &'a PipelineContext<'_>, debug: bool) -> AssembleRequest<'a> {
        let package = self.package;
        AssembleRequest {
            package,
            repo_dir: ctx.repository_dir(package, debug),
            arch: &ctx.config.build.arch,
            archive_name: package.archive_name(debug),
            staged_dir: if debug {
                package.debug_destdir()
            } else {
                package.destdir.clone()
            },
            debug,
            epoch: ctx.epoch,
            state_dir: &ctx.config.paths.statedir,
            signing_key: self.signing_key,
            hooks: self.hooks,
            lock_poll: ctx.lock_poll,
        }
    }
}

fn wants_debug_archive(ctx: &PipelineContext<'_>, package: &PackageInfo) -> bool {
    if !ctx.config.build.debug || !package.options.debug {
        return false;
    }
    if package.has_explicit_debug_subpackage() {
        log::debug!("{} declares its own debug subpackage", package.pkgname);
        return false;
    }
    package.debug_destdir().is_dir()
}

/// Regenerates the index of `dir`, signing it when a key is configured.
///
/// # Errors
///
/// Returns an error when the index cannot be built or signed.
pub fn index_repository(ctx: &PipelineContext<'_>, dir: &Utf8Path) -> Result<()> {
    let signing_key = ctx.signing_key();
    let options = IndexOptions {
        epoch: ctx.epoch,
        signing_key: signing_key.as_deref(),
        arch: Some(&ctx.config.build.arch),
        repositories: &ctx.config.build.repositories,
    };
    IndexBuilder::new(ctx.executor, &ctx.config.tools).build_index(dir, &options)
}

/// Strips, assembles and indexes one package.
///
/// Shared-library lists left unset by the definition are filled from
/// `elfs` before assembly.
///
/// # Errors
///
/// Returns the first failure of any stage; later stages do not run.
pub fn run_post_build(
    ctx: &PipelineContext<'_>,
    package: &mut PackageInfo,
    elfs: &ElfMap,
    inspector: &dyn ElfInspector,
    writer: &dyn ArchiveWriter,
) -> Result<PublishReport> {
    let stripped = strip_staged(ctx, package, elfs, inspector)?;
    log::debug!(
        "{}: {} file(s) stripped, {} ignored",
        package.pkgname,
        stripped.stripped.len(),
        stripped.ignored.len()
    );

    fill_shared_libraries(package, elfs);
    let report = publish_package(ctx, package, writer)?;
    for dir in report.updated_dirs() {
        index_repository(ctx, &dir)?;
    }
    Ok(report)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;

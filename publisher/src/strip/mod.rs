//! ELF classification and stripping of a staged install tree.
//!
//! [`strip_package`] walks the staged tree in sorted order, classifies every
//! regular file with the help of the pre-computed [`ElfMap`] and an
//! [`ElfInspector`], and strips eligible files in place. Debug information is
//! split into `usr/lib/debug` first when debug packages are wanted, and the
//! resulting subtree is moved into the `-dbg` package root once the pass
//! finishes. Any inconsistency aborts the pass for the whole package.

pub mod binutils;
pub mod debug;
pub mod elf;


use camino::{Utf8Path, Utf8PathBuf};
use pkgseal_common::PatternSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use walkdir::WalkDir;

pub use binutils::{Binutils, StripMode};
pub use debug::{DEBUG_SUBDIR, DebugSplitter, relocate_debug_tree};
pub use elf::{ElfAttributes, ElfHeader, ElfInspector, ElfMap, ScanelfInspector};

use crate::config::BuildConfig;
use crate::error::{PublishError, Result};
use crate::package::PackageInfo;

/// Magic header of `ar` static archives.
const AR_MAGIC: &[u8; 8] = b"!<arch>\n";

/// Classification of a staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    /// Position-independent executable.
    PieExecutable,
    /// Fixed-address executable.
    NonPieExecutable,
    /// Shared library.
    SharedLibrary,
    /// Statically linked executable.
    StaticExecutable,
    /// `ar` archive.
    StaticArchive,
    /// Not an object the pass touches.
    Opaque,
}

impl fmt::Display for FileClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PieExecutable => "position-independent executable",
            Self::NonPieExecutable => "executable",
            Self::SharedLibrary => "library",
            Self::StaticExecutable => "static executable",
            Self::StaticArchive => "static library",
            Self::Opaque => "file",
        })
    }
}

/// A file of the staged tree as seen by the strip pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Path relative to the staged root.
    pub path: Utf8PathBuf,
    /// Classification.
    pub class: FileClass,
    /// Attributes from the ELF map, when recorded.
    pub attributes: Option<ElfAttributes>,
    /// Extracted debug file, when debug info was split off.
    pub debug_file: Option<Utf8PathBuf>,
}

/// Per-package strip policy.
#[derive(Debug, Clone, Default)]
pub struct StripPolicy {
    /// Run the pass at all.
    pub strip: bool,
    /// Split debug information.
    pub debug: bool,
    /// PIE hardening is enabled.
    pub pie: bool,
    /// Files never to be stripped.
    pub nostrip: PatternSet,
    /// Executables allowed to be non-PIE.
    pub nopie: PatternSet,
}

impl StripPolicy {
    /// Combines the package options with the global build switches.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Pattern`] for a malformed allow-list entry.
    pub fn for_package(package: &PackageInfo, build: &BuildConfig) -> Result<Self> {
        Ok(Self {
            strip: package.options.strip,
            debug: package.options.debug && build.debug,
            pie: build.pie,
            nostrip: package.nostrip_patterns()?,
            nopie: package.nopie_patterns()?,
        })
    }

    fn allows_nopie(&self, relative: &Utf8Path) -> bool {
        !self.pie || self.nopie.matches(relative)
    }
}

/// Everything the strip pass needs for one package.
pub struct StripContext<'a> {
    /// Staged root being stripped.
    pub destdir: &'a Utf8Path,
    /// Staged root of the `-dbg` package.
    pub debug_destdir: &'a Utf8Path,
    /// Pre-computed ELF attributes.
    pub elfs: &'a ElfMap,
    /// Allow-lists and switches.
    pub policy: &'a StripPolicy,
    /// Header inspection.
    pub inspector: &'a dyn ElfInspector,
    /// Symbol tools.
    pub tools: Binutils<'a>,
}

/// Outcome of a strip pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripReport {
    /// Every stripped file, in visiting order.
    pub stripped: Vec<StagedFile>,
    /// Files left alone because of a `nostrip` entry or an `EM_NONE` header.
    pub ignored: Vec<Utf8PathBuf>,
    /// Debug root of the `-dbg` package, when debug files were produced.
    pub debug_root: Option<Utf8PathBuf>,
}

/// Strips every eligible file of the staged tree in place.
///
/// # Errors
///
/// Returns the first classification or tool failure; files visited before
/// the failure stay stripped but no debug tree is relocated.
pub fn strip_package(ctx: &StripContext<'_>) -> Result<StripReport> {
    let mut report = StripReport::default();
    if !ctx.policy.strip {
        log::debug!("stripping disabled for {}", ctx.destdir);
        return Ok(report);
    }

    let splitter = DebugSplitter::new(ctx.tools, ctx.destdir, ctx.policy.debug);
    let debug_root = splitter.debug_root();

    let walker = WalkDir::new(ctx.destdir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.path() != debug_root.as_std_path());
    for entry in walker {
        let entry = entry.map_err(|e| PublishError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8Path::from_path(entry.path())
            .ok_or_else(|| PublishError::NonUtf8Path(entry.path().display().to_string()))?;
        let relative = path
            .strip_prefix(ctx.destdir)
            .map_err(|_| PublishError::NonUtf8Path(path.to_string()))?;

        match strip_file(ctx, &splitter, path, relative)? {
            Visit::Stripped(file) => {
                log::info!("   Stripped {}: {}", file.class, file.path);
                report.stripped.push(file);
            }
            Visit::Ignored => report.ignored.push(relative.to_owned()),
            Visit::Skipped => {}
        }
    }

    if ctx.policy.debug {
        report.debug_root = relocate_debug_tree(ctx.destdir, ctx.debug_destdir)?;
    }
    Ok(report)
}

enum Visit {
    Stripped(StagedFile),
    Ignored,
    Skipped,
}

fn strip_file(
    ctx: &StripContext<'_>,
    splitter: &DebugSplitter<'_>,
    path: &Utf8Path,
    relative: &Utf8Path,
) -> Result<Visit> {
    let attributes = ctx.elfs.get(relative);
    if attributes.is_none() && !is_static_archive(path).map_err(PublishError::io_at(path))? {
        return Ok(Visit::Skipped);
    }

    if let Some(pattern) = ctx.policy.nostrip.find_match(relative) {
        log::debug!("not stripping {relative}: matches {}", pattern.as_str());
        return Ok(Visit::Ignored);
    }

    let Some(attributes) = attributes else {
        set_mode(path, 0o644)?;
        ctx.tools.strip(path, relative, StripMode::DebugOnly)?;
        return Ok(Visit::Stripped(staged(relative, FileClass::StaticArchive, None, None)));
    };

    if attributes.is_static {
        set_mode(path, 0o755)?;
        ctx.tools.strip(path, relative, StripMode::All)?;
        return Ok(Visit::Stripped(staged(
            relative,
            FileClass::StaticExecutable,
            Some(attributes),
            None,
        )));
    }

    let header = ctx.inspector.inspect(path, relative)?;
    if header.is_container() {
        log::info!("   Ignoring ELF file with no machine: {relative}");
        return Ok(Visit::Ignored);
    }

    let class = classify(&header, relative)?;
    if class == FileClass::NonPieExecutable && !ctx.policy.allows_nopie(relative) {
        return Err(PublishError::NonPieExecutable {
            path: relative.to_owned(),
        });
    }

    set_mode(path, 0o755)?;
    let debug_file = splitter.extract(relative)?;
    let mode = if class == FileClass::NonPieExecutable {
        StripMode::All
    } else {
        StripMode::Unneeded
    };
    ctx.tools.strip(path, relative, mode)?;
    if let Some(debug_file) = &debug_file {
        splitter.attach(relative, debug_file)?;
    }

    Ok(Visit::Stripped(staged(relative, class, Some(attributes), debug_file)))
}

/// Maps an inspected header to a file class.
///
/// `ET_DYN` objects are position independent; with an interpreter they are
/// executables, without one libraries. `ET_EXEC` objects must carry an
/// interpreter.
fn classify(header: &ElfHeader, relative: &Utf8Path) -> Result<FileClass> {
    let pie = match header.object_type.as_str() {
        "ET_DYN" => true,
        "ET_EXEC" => false,
        other => {
            return Err(PublishError::UnknownObjectType {
                path: relative.to_owned(),
                object_type: other.to_owned(),
            });
        }
    };

    match (pie, header.is_dynlib()) {
        (false, true) => Err(PublishError::MissingInterpreter {
            path: relative.to_owned(),
        }),
        (false, false) => Ok(FileClass::NonPieExecutable),
        (true, true) => Ok(FileClass::SharedLibrary),
        (true, false) => Ok(FileClass::PieExecutable),
    }
}

fn staged(
    relative: &Utf8Path,
    class: FileClass,
    attributes: Option<&ElfAttributes>,
    debug_file: Option<Utf8PathBuf>,
) -> StagedFile {
    StagedFile {
        path: relative.to_owned(),
        class,
        attributes: attributes.cloned(),
        debug_file,
    }
}

/// Returns `true` for a non-empty `ar` archive.
fn is_static_archive(path: &Utf8Path) -> io::Result<bool> {
    let mut header = [0u8; AR_MAGIC.len() + 1];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < header.len() {
        let Some(rest) = header.get_mut(filled..) else {
            break;
        };
        match file.read(rest)? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled == header.len() && header.starts_with(AR_MAGIC))
}

fn set_mode(path: &Utf8Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(PublishError::io_at(path))
}

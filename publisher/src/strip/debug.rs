//! Debug-info separation.
//!
//! Extracted debug files mirror the stripped file's package-relative path
//! under `<destdir>/usr/lib/debug`. Once the strip pass finishes, that
//! subtree is moved into the staged root of the `-dbg` package.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use walkdir::WalkDir;

use super::binutils::Binutils;
use crate::error::{PublishError, Result};

/// Debug subtree relative to a staged root.
pub const DEBUG_SUBDIR: &str = "usr/lib/debug";

/// Extracts debug info and attaches debug links.
pub struct DebugSplitter<'a> {
    tools: Binutils<'a>,
    destdir: &'a Utf8Path,
    enabled: bool,
}

impl<'a> DebugSplitter<'a> {
    /// Creates a splitter for the staged tree at `destdir`.
    ///
    /// When `enabled` is `false`, [`DebugSplitter::extract`] does nothing.
    #[must_use]
    pub fn new(tools: Binutils<'a>, destdir: &'a Utf8Path, enabled: bool) -> Self {
        Self {
            tools,
            destdir,
            enabled,
        }
    }

    /// Returns the debug subtree of the staged root.
    #[must_use]
    pub fn debug_root(&self) -> Utf8PathBuf {
        self.destdir.join(DEBUG_SUBDIR)
    }

    /// Extracts the debug sections of `relative` into the debug subtree.
    ///
    /// Returns the path of the extracted file, or `None` when splitting is
    /// disabled.
    ///
    /// # Errors
    ///
    /// Returns an error when `objcopy` fails or the file cannot be created.
    pub fn extract(&self, relative: &Utf8Path) -> Result<Option<Utf8PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }

        let debug_file = self.debug_root().join(relative);
        if let Some(parent) = debug_file.parent() {
            fs::create_dir_all(parent).map_err(PublishError::io_at(parent))?;
        }
        self.tools
            .only_keep_debug(&self.destdir.join(relative), &debug_file, relative)?;
        fs::set_permissions(&debug_file, fs::Permissions::from_mode(0o644))
            .map_err(PublishError::io_at(&debug_file))?;
        Ok(Some(debug_file))
    }

    /// Links the stripped `relative` file to its extracted `debug_file`.
    ///
    /// # Errors
    ///
    /// Returns an error when `objcopy` fails.
    pub fn attach(&self, relative: &Utf8Path, debug_file: &Utf8Path) -> Result<()> {
        self.tools
            .add_debuglink(&self.destdir.join(relative), debug_file, relative)
    }
}

/// Moves `<destdir>/usr/lib/debug` into `<debug_destdir>/usr/lib/debug`.
///
/// A stale target tree is replaced. `<destdir>/usr/lib` is removed when the
/// move leaves it empty. Returns the new debug root, or `None` when there was
/// nothing to move.
///
/// # Errors
///
/// Returns [`PublishError::DebugRelocation`] when the tree cannot be moved.
pub fn relocate_debug_tree(
    destdir: &Utf8Path,
    debug_destdir: &Utf8Path,
) -> Result<Option<Utf8PathBuf>> {
    let source = destdir.join(DEBUG_SUBDIR);
    if !source.is_dir() {
        return Ok(None);
    }

    let target = debug_destdir.join(DEBUG_SUBDIR);
    let relocation_error = |source| PublishError::DebugRelocation {
        path: target.clone(),
        source,
    };

    if target.exists() {
        fs::remove_dir_all(&target).map_err(relocation_error)?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(relocation_error)?;
    }
    match fs::rename(&source, &target) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            copy_tree(&source, &target).map_err(relocation_error)?;
            fs::remove_dir_all(&source).map_err(relocation_error)?;
        }
        Err(err) => return Err(relocation_error(err)),
    }
    log::debug!("moved debug files to {target}");

    let libdir = destdir.join("usr/lib");
    let is_empty = fs::read_dir(&libdir)
        .map_err(PublishError::io_at(&libdir))?
        .next()
        .is_none();
    if is_empty {
        fs::remove_dir(&libdir).map_err(PublishError::io_at(&libdir))?;
    }

    Ok(Some(target))
}

fn copy_tree(source: &Utf8Path, target: &Utf8Path) -> io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let dest = target.as_std_path().join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

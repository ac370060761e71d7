//! Wrappers around `strip` and `objcopy`.

use camino::Utf8Path;
use pkgseal_common::{CommandExecutor, ToolCommand, run_checked};

use crate::config::ToolsConfig;
use crate::error::{PublishError, Result};

/// Symbol removal modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripMode {
    /// Remove all symbols.
    All,
    /// Remove debugging symbols only.
    DebugOnly,
    /// Remove symbols not needed for relocation, keeping the dynamic table.
    Unneeded,
}

impl StripMode {
    fn flag(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::DebugOnly => Some("--strip-debug"),
            Self::Unneeded => Some("--strip-unneeded"),
        }
    }
}

/// Symbol tools bound to an executor.
#[derive(Clone, Copy)]
pub struct Binutils<'a> {
    executor: &'a dyn CommandExecutor,
    strip: &'a str,
    objcopy: &'a str,
}

impl<'a> Binutils<'a> {
    /// Creates the wrappers using the tool names from `tools`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, tools: &'a ToolsConfig) -> Self {
        Self {
            executor,
            strip: &tools.strip,
            objcopy: &tools.objcopy,
        }
    }

    /// Strips `file` in place.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Tool`] naming `relative` when `strip` fails.
    pub fn strip(&self, file: &Utf8Path, relative: &Utf8Path, mode: StripMode) -> Result<()> {
        let command = ToolCommand::new(self.strip)
            .args(mode.flag())
            .arg_path(file);
        run_checked(self.executor, &command)
            .map(drop)
            .map_err(|source| PublishError::tool("strip", relative, source))
    }

    /// Copies only the debug sections of `file` into `debug_file`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Tool`] naming `relative` when `objcopy` fails.
    pub fn only_keep_debug(
        &self,
        file: &Utf8Path,
        debug_file: &Utf8Path,
        relative: &Utf8Path,
    ) -> Result<()> {
        let command = ToolCommand::new(self.objcopy)
            .arg("--only-keep-debug")
            .arg_path(file)
            .arg_path(debug_file);
        run_checked(self.executor, &command)
            .map(drop)
            .map_err(|source| PublishError::tool("create debug file for", relative, source))
    }

    /// Points `file` at its extracted `debug_file`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Tool`] naming `relative` when `objcopy` fails.
    pub fn add_debuglink(
        &self,
        file: &Utf8Path,
        debug_file: &Utf8Path,
        relative: &Utf8Path,
    ) -> Result<()> {
        let command = ToolCommand::new(self.objcopy)
            .arg(format!("--add-gnu-debuglink={debug_file}"))
            .arg_path(file);
        run_checked(self.executor, &command)
            .map(drop)
            .map_err(|source| PublishError::tool("attach debug link to", relative, source))
    }
}

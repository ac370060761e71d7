//! ELF attributes and header inspection.
//!
//! Two sources of ELF facts feed the strip pass. The [`ElfMap`] is produced
//! by an earlier scan of the staged tree and records, per package-relative
//! path, the soname, needed libraries, interpreter and static flag of every
//! ELF object. The [`ElfInspector`] is queried per file for the machine,
//! object type and interpreter as reported by `scanelf`.

use camino::{Utf8Path, Utf8PathBuf};
use pkgseal_common::{CommandExecutor, ToolCommand, run_checked};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use crate::error::{PublishError, Result};

/// Machine name reported for ELF files used purely as a container.
pub const MACHINE_NONE: &str = "EM_NONE";

/// Pre-computed attributes of one ELF object.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ElfAttributes {
    /// `DT_SONAME`, for shared libraries.
    pub soname: Option<String>,
    /// `DT_NEEDED` entries.
    pub needed: Vec<String>,
    /// Program interpreter, when present.
    pub interpreter: Option<String>,
    /// Whether the object is statically linked.
    #[serde(rename = "static")]
    pub is_static: bool,
}

/// Map of package-relative paths to their [`ElfAttributes`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ElfMap {
    entries: BTreeMap<Utf8PathBuf, ElfAttributes>,
}

impl ElfMap {
    /// Builds a map from `(relative path, attributes)` pairs.
    pub fn from_entries<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, ElfAttributes)>,
        P: Into<Utf8PathBuf>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(path, attrs)| (path.into(), attrs))
                .collect(),
        }
    }

    /// Loads a JSON object keyed by package-relative path.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::InvalidElfMap`] when the file cannot be read
    /// or is not a valid map.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let invalid = |reason: String| PublishError::InvalidElfMap {
            path: path.to_owned(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))
    }

    /// Returns the attributes recorded for `relative`, if any.
    #[must_use]
    pub fn get(&self, relative: &Utf8Path) -> Option<&ElfAttributes> {
        self.entries.get(relative)
    }

    /// Returns `true` when no ELF objects were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sonames provided by the recorded objects, sorted and deduplicated.
    #[must_use]
    pub fn shlib_provides(&self) -> Vec<String> {
        self.sonames().into_iter().map(str::to_owned).collect()
    }

    /// Needed libraries not satisfied by the package itself, sorted and
    /// deduplicated.
    #[must_use]
    pub fn shlib_requires(&self) -> Vec<String> {
        let provided = self.sonames();
        let needed: BTreeSet<&str> = self
            .entries
            .values()
            .flat_map(|attrs| attrs.needed.iter().map(String::as_str))
            .filter(|lib| !provided.contains(lib))
            .collect();
        needed.into_iter().map(str::to_owned).collect()
    }

    fn sonames(&self) -> BTreeSet<&str> {
        self.entries
            .values()
            .filter_map(|attrs| attrs.soname.as_deref())
            .collect()
    }
}

/// Machine, object type and interpreter of one ELF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfHeader {
    /// Machine name, e.g. `EM_X86_64`.
    pub machine: String,
    /// Object type, e.g. `ET_DYN`.
    pub object_type: String,
    /// Program interpreter; empty for libraries.
    pub interpreter: String,
}

impl ElfHeader {
    /// Returns `true` when the file only uses ELF as a container format.
    #[must_use]
    pub fn is_container(&self) -> bool {
        self.machine == MACHINE_NONE
    }

    /// Returns `true` when no interpreter is present.
    #[must_use]
    pub fn is_dynlib(&self) -> bool {
        self.interpreter.is_empty()
    }
}

/// Reports ELF header facts for a file.
#[cfg_attr(test, mockall::automock)]
pub trait ElfInspector {
    /// Inspects the file at `path`; `relative` is used in diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error when the inspection tool fails or its output cannot
    /// be parsed.
    fn inspect(&self, path: &Utf8Path, relative: &Utf8Path) -> Result<ElfHeader>;
}

/// [`ElfInspector`] backed by `scanelf`.
pub struct ScanelfInspector<'a> {
    executor: &'a dyn CommandExecutor,
    program: &'a str,
}

impl<'a> ScanelfInspector<'a> {
    /// Creates an inspector running `program` through `executor`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, program: &'a str) -> Self {
        Self { executor, program }
    }
}

impl ElfInspector for ScanelfInspector<'_> {
    fn inspect(&self, path: &Utf8Path, relative: &Utf8Path) -> Result<ElfHeader> {
        let command = ToolCommand::new(self.program)
            .args(["--nobanner", "--nocolor", "--format", "%a|%o|%i"])
            .arg_path(path);
        let output = run_checked(self.executor, &command)
            .map_err(|source| PublishError::tool("scan", relative, source))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_scanelf_line(&stdout, path).ok_or_else(|| PublishError::InvalidElfProbe {
            path: relative.to_owned(),
            output: stdout.trim().to_owned(),
        })
    }
}

/// Parses `%a|%o|%i <path>` output.
fn parse_scanelf_line(output: &str, path: &Utf8Path) -> Option<ElfHeader> {
    let fields = output.trim().strip_suffix(path.as_str())?;
    let fields = fields.strip_suffix(' ').unwrap_or(fields);
    let mut parts = fields.split('|');
    let (Some(machine), Some(object_type), Some(interpreter), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    Some(ElfHeader {
        machine: machine.trim().to_owned(),
        object_type: object_type.trim().to_owned(),
        interpreter: interpreter.trim().to_owned(),
    })
}

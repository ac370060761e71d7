//! Package definitions as seen by the publishing pipeline.
//!
//! A [`PackageInfo`] carries the template-derived facts the pipeline needs:
//! identity, descriptive metadata, dependency lists, strip policy and the
//! location of the staged install tree. Definitions are loaded from TOML
//! files; the definition file's modification time serves as the freshness
//! reference for already-built archives.

use camino::{Utf8Path, Utf8PathBuf};
use pkgseal_common::{PatternError, PatternSet, is_valid_version};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::time::SystemTime;

use crate::error::{PublishError, Result};

/// Archive file extension.
pub const ARCHIVE_EXTENSION: &str = "apk";

/// Suffix appended to the names of automatically generated debug packages.
pub const DEBUG_SUFFIX: &str = "-dbg";

/// Lifecycle hook points an archive may carry scripts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before first installation.
    PreInstall,
    /// After first installation.
    PostInstall,
    /// Before an upgrade.
    PreUpgrade,
    /// After an upgrade.
    PostUpgrade,
    /// Before removal.
    PreDeinstall,
    /// After removal.
    PostDeinstall,
}

impl HookPoint {
    /// All hook points in discovery order.
    pub const ALL: [Self; 6] = [
        Self::PreInstall,
        Self::PostInstall,
        Self::PreUpgrade,
        Self::PostUpgrade,
        Self::PreDeinstall,
        Self::PostDeinstall,
    ];

    /// Returns the hook name used in script file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreInstall => "pre-install",
            Self::PostInstall => "post-install",
            Self::PreUpgrade => "pre-upgrade",
            Self::PostUpgrade => "post-upgrade",
            Self::PreDeinstall => "pre-deinstall",
            Self::PostDeinstall => "post-deinstall",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle scripts found for a package, in [`HookPoint::ALL`] order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookScripts {
    scripts: Vec<(HookPoint, Utf8PathBuf)>,
}

impl HookScripts {
    /// Looks for `<template_dir>/<pkgname>.<hook>` for every hook point.
    #[must_use]
    pub fn discover(template_dir: &Utf8Path, pkgname: &str) -> Self {
        let scripts = HookPoint::ALL
            .into_iter()
            .filter_map(|hook| {
                let path = template_dir.join(format!("{pkgname}.{hook}"));
                path.is_file().then_some((hook, path))
            })
            .collect();
        Self { scripts }
    }

    /// Iterates over the discovered scripts.
    pub fn iter(&self) -> impl Iterator<Item = (HookPoint, &Utf8Path)> {
        self.scripts.iter().map(|(hook, path)| (*hook, path.as_path()))
    }

    /// Returns `true` when no script was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Per-package switches.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PackageOptions {
    /// Run the strip pass over the staged tree.
    pub strip: bool,
    /// Split debug information into a `-dbg` package.
    pub debug: bool,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            strip: true,
            debug: true,
        }
    }
}

/// A package definition.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageInfo {
    /// Package name.
    pub pkgname: String,
    /// Upstream version.
    pub version: String,
    /// Packaging revision.
    #[serde(default)]
    pub revision: u32,
    /// One-line description.
    pub short_desc: String,
    /// Upstream homepage.
    #[serde(default)]
    pub url: String,
    /// Package maintainer.
    #[serde(default)]
    pub maintainer: String,
    /// SPDX license expression.
    #[serde(default)]
    pub license: String,
    /// Name of the template this package originates from; defaults to
    /// [`PackageInfo::pkgname`].
    #[serde(default)]
    pub origin: Option<String>,
    /// Repository (e.g. `main`) the archive is published into.
    #[serde(default = "default_repository")]
    pub repository: String,
    /// Commit of the packaging tree the build came from.
    #[serde(default)]
    pub git_revision: Option<String>,
    /// Whether the packaging tree had uncommitted changes.
    #[serde(default)]
    pub git_dirty: bool,
    /// Virtual capabilities provided.
    #[serde(default)]
    pub provides: Vec<String>,
    /// Declared runtime dependencies.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Shared libraries provided, when discovered.
    #[serde(default)]
    pub shlib_provides: Option<Vec<String>>,
    /// Shared libraries required, when discovered.
    #[serde(default)]
    pub shlib_requires: Option<Vec<String>>,
    /// Files never to be stripped.
    #[serde(default)]
    pub nostrip_files: Vec<String>,
    /// Executables allowed to be non-PIE.
    #[serde(default)]
    pub nopie_files: Vec<String>,
    /// Other packages built from the same template.
    #[serde(default)]
    pub subpackages: Vec<String>,
    /// Staged install tree.
    pub destdir: Utf8PathBuf,
    /// Template directory holding lifecycle scripts.
    #[serde(default)]
    pub template_dir: Option<Utf8PathBuf>,
    /// Per-package switches.
    #[serde(default)]
    pub options: PackageOptions,
    /// The file this definition was loaded from.
    #[serde(skip)]
    pub definition: Utf8PathBuf,
    /// Rebuild archives even when they look fresh.
    #[serde(skip)]
    pub force: bool,
}

fn default_repository() -> String {
    "main".to_owned()
}

impl PackageInfo {
    /// Loads a definition from a TOML file.
    ///
    /// Relative `destdir` and `template_dir` entries are resolved against the
    /// file's directory; the template directory defaults to it.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::InvalidPackage`] when the file cannot be read
    /// or parsed, or when its version and revision do not form a valid apk
    /// version.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let invalid = |reason: String| PublishError::InvalidPackage {
            path: path.to_owned(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let mut info: Self = toml::from_str(&text).map_err(|e| invalid(e.to_string()))?;
        let version_release = info.version_release();
        if !is_valid_version(&version_release) {
            return Err(invalid(format!("invalid version {version_release}")));
        }

        let base = path
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        if info.destdir.is_relative() {
            info.destdir = base.join(&info.destdir);
        }
        info.template_dir = Some(match info.template_dir.take() {
            Some(dir) if dir.is_relative() => base.join(dir),
            Some(dir) => dir,
            None => base.to_owned(),
        });
        info.definition = path.to_owned();
        Ok(info)
    }

    /// Returns the originating template name.
    #[must_use]
    pub fn origin(&self) -> &str {
        self.origin.as_deref().unwrap_or(&self.pkgname)
    }

    /// Returns `<version>-r<revision>`.
    #[must_use]
    pub fn version_release(&self) -> String {
        format!("{}-r{}", self.version, self.revision)
    }

    /// Returns the archive file name for the main or debug variant.
    #[must_use]
    pub fn archive_name(&self, debug: bool) -> String {
        let suffix = if debug { DEBUG_SUFFIX } else { "" };
        format!(
            "{}{suffix}-{}.{ARCHIVE_EXTENSION}",
            self.pkgname,
            self.version_release()
        )
    }

    /// Returns the staged root of the automatically generated debug package,
    /// a sibling of [`PackageInfo::destdir`].
    #[must_use]
    pub fn debug_destdir(&self) -> Utf8PathBuf {
        let name = format!("{}{DEBUG_SUFFIX}-{}", self.pkgname, self.version);
        match self.destdir.parent() {
            Some(parent) => parent.join(name),
            None => Utf8PathBuf::from(name),
        }
    }

    /// Returns `true` when the template declares its own `-dbg` subpackage,
    /// in which case no debug archive is generated automatically.
    #[must_use]
    pub fn has_explicit_debug_subpackage(&self) -> bool {
        let explicit = format!("{}{DEBUG_SUFFIX}", self.origin());
        self.subpackages.iter().any(|sp| *sp == explicit)
    }

    /// Returns the modification time of the definition file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file metadata cannot be read.
    pub fn definition_mtime(&self) -> Result<SystemTime> {
        self.definition
            .metadata()
            .and_then(|m| m.modified())
            .map_err(PublishError::io_at(&self.definition))
    }

    /// Discovers lifecycle scripts in the template directory.
    #[must_use]
    pub fn hook_scripts(&self) -> HookScripts {
        self.template_dir
            .as_deref()
            .map(|dir| HookScripts::discover(dir, &self.pkgname))
            .unwrap_or_default()
    }

    /// Compiles the `nostrip` allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] for a malformed pattern.
    pub fn nostrip_patterns(&self) -> std::result::Result<PatternSet, PatternError> {
        PatternSet::new(&self.nostrip_files)
    }

    /// Compiles the `nopie` allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] for a malformed pattern.
    pub fn nopie_patterns(&self) -> std::result::Result<PatternSet, PatternError> {
        PatternSet::new(&self.nopie_files)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    pub(crate) fn sample_package(destdir: Utf8PathBuf) -> PackageInfo {
        PackageInfo {
            pkgname: "foo".to_owned(),
            version: "1.2".to_owned(),
            revision: 3,
            short_desc: "foo utilities".to_owned(),
            url: "https://foo.example.org".to_owned(),
            maintainer: "Jane Doe <jane@example.org>".to_owned(),
            license: "MIT".to_owned(),
            origin: None,
            repository: "main".to_owned(),
            git_revision: Some("abc1234".to_owned()),
            git_dirty: false,
            provides: vec!["cmd:foo=1.2-r3".to_owned()],
            depends: vec!["musl".to_owned()],
            shlib_provides: None,
            shlib_requires: None,
            nostrip_files: Vec::new(),
            nopie_files: Vec::new(),
            subpackages: Vec::new(),
            destdir,
            template_dir: None,
            options: PackageOptions::default(),
            definition: Utf8PathBuf::new(),
            force: false,
        }
    }

    fn utf8_temp() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf8 temp dir");
        (dir, path)
    }

    #[test]
    fn archive_names_follow_convention() {
        let pkg = sample_package(Utf8PathBuf::from("/build/destdir/foo-1.2"));
        assert_eq!(pkg.archive_name(false), "foo-1.2-r3.apk");
        assert_eq!(pkg.archive_name(true), "foo-dbg-1.2-r3.apk");
        assert_eq!(
            pkg.debug_destdir(),
            Utf8PathBuf::from("/build/destdir/foo-dbg-1.2")
        );
    }

    #[test]
    fn explicit_debug_subpackage_is_detected() {
        let mut pkg = sample_package(Utf8PathBuf::from("d"));
        assert!(!pkg.has_explicit_debug_subpackage());
        pkg.subpackages = vec!["foo-devel".to_owned(), "foo-dbg".to_owned()];
        assert!(pkg.has_explicit_debug_subpackage());
    }

    #[test]
    fn hook_scripts_are_discovered_in_order() {
        let (_guard, dir) = utf8_temp();
        fs::write(dir.join("foo.post-install"), "#!/bin/sh\n").expect("write hook");
        fs::write(dir.join("foo.pre-install"), "#!/bin/sh\n").expect("write hook");
        fs::write(dir.join("bar.pre-upgrade"), "#!/bin/sh\n").expect("write hook");

        let hooks = HookScripts::discover(&dir, "foo");
        let found: Vec<_> = hooks.iter().map(|(hook, _)| hook).collect();

        assert_eq!(found, [HookPoint::PreInstall, HookPoint::PostInstall]);
    }

    #[test]
    fn load_resolves_paths_relative_to_definition() {
        let (_guard, dir) = utf8_temp();
        let path = dir.join("foo.toml");
        fs::write(
            &path,
            r#"
                pkgname = "foo"
                version = "1.0"
                revision = 1
                short_desc = "foo"
                destdir = "destdir/foo-1.0"
                depends = ["bar>=2"]
                nostrip_files = ["usr/lib/firmware/*"]

                [options]
                debug = false
            "#,
        )
        .expect("write definition");

        let pkg = PackageInfo::load(&path).expect("valid definition");

        assert_eq!(pkg.destdir, dir.join("destdir/foo-1.0"));
        assert_eq!(pkg.template_dir.as_deref(), Some(dir.as_path()));
        assert_eq!(pkg.repository, "main");
        assert_eq!(pkg.origin(), "foo");
        assert!(pkg.options.strip);
        assert!(!pkg.options.debug);
        assert_eq!(pkg.definition, path);
        assert!(pkg.nostrip_patterns().expect("patterns").matches(Utf8Path::new("usr/lib/firmware/x.bin")));
    }

    #[rstest]
    #[case("1.0-rc1")]
    #[case("v2")]
    #[case("")]
    fn load_rejects_invalid_versions(#[case] version: &str) {
        let (_guard, dir) = utf8_temp();
        let path = dir.join("foo.toml");
        fs::write(
            &path,
            format!(
                "pkgname = \"foo\"\nversion = \"{version}\"\nrevision = 0\nshort_desc = \"foo\"\ndestdir = \"d\"\n"
            ),
        )
        .expect("write definition");

        let err = PackageInfo::load(&path).expect_err("bad version");
        assert!(err.to_string().contains("invalid version"), "{err}");
    }

    #[test]
    fn load_rejects_missing_fields() {
        let (_guard, dir) = utf8_temp();
        let path = dir.join("broken.toml");
        fs::write(&path, "pkgname = \"foo\"\n").expect("write definition");

        let err = PackageInfo::load(&path).expect_err("incomplete definition");
        assert!(matches!(err, PublishError::InvalidPackage { .. }));
    }
}

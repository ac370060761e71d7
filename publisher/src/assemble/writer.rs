//! Archive writer seam and its `apk mkpkg` implementation.

use camino::Utf8PathBuf;
use pkgseal_common::{CommandExecutor, SOURCE_DATE_EPOCH, SourceDateEpoch, ToolCommand, run_checked};
use std::fs;

use super::metadata::{MetadataValue, PackageMetadata};
use crate::error::{PublishError, Result};
use crate::package::HookScripts;

/// Fallback `PATH` for tool invocations when the caller has none.
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Everything the archive writer needs to produce one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    /// Package name, with the `-dbg` suffix for debug archives.
    pub pkgname: String,
    /// `<version>-r<revision>`.
    pub version_release: String,
    /// Target architecture.
    pub arch: String,
    /// Timestamp for every embedded mtime.
    pub epoch: SourceDateEpoch,
    /// Staged root whose contents go into the archive.
    pub staged_root: Utf8PathBuf,
    /// Scratch directory.
    pub state_dir: Utf8PathBuf,
    /// Archive path to create.
    pub output: Utf8PathBuf,
    /// Private key to sign the archive with.
    pub signing_key: Option<Utf8PathBuf>,
    /// Archive metadata.
    pub metadata: PackageMetadata,
    /// Lifecycle scripts embedded in the archive.
    pub hooks: HookScripts,
}

/// Produces archive containers.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveWriter {
    /// Writes the archive described by `request`.
    ///
    /// # Errors
    ///
    /// Returns an error when the archive cannot be produced.
    fn write(&self, request: &ArchiveRequest) -> Result<()>;
}

/// [`ArchiveWriter`] running `apk mkpkg`.
pub struct ApkMkpkgWriter<'a> {
    executor: &'a dyn CommandExecutor,
    apk: &'a str,
    path: String,
}

impl<'a> ApkMkpkgWriter<'a> {
    /// Creates a writer running `apk` through `executor`.
    ///
    /// The child's `PATH` is taken from the current process.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, apk: &'a str) -> Self {
        let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_owned());
        Self { executor, apk, path }
    }

    /// Overrides the `PATH` handed to the child.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    fn command(&self, request: &ArchiveRequest) -> ToolCommand {
        let mut command = ToolCommand::new(self.apk)
            .arg("mkpkg")
            .clear_env()
            .env("PATH", &self.path)
            .env(SOURCE_DATE_EPOCH, request.epoch.to_string())
            .env("TMPDIR", request.state_dir.as_str())
            .args(info("name", &request.pkgname))
            .args(info("version", &request.version_release))
            .args(info("arch", &request.arch));

        let mut provides = Vec::new();
        let mut depends = Vec::new();
        for (key, value) in request.metadata.iter() {
            match (key, value) {
                ("provides", MetadataValue::List(items)) => provides.extend(items.iter().cloned()),
                ("depends", MetadataValue::List(items)) => depends.extend(items.iter().cloned()),
                ("shlib_provides", MetadataValue::List(items)) => {
                    provides.extend(items.iter().map(|lib| format!("so:{lib}")));
                }
                ("shlib_requires", MetadataValue::List(items)) => {
                    depends.extend(items.iter().map(|lib| format!("so:{lib}")));
                }
                ("hooks", MetadataValue::List(_)) => {}
                (key, MetadataValue::Text(text)) => {
                    let key = if key == "pkgdesc" { "description" } else { key };
                    command = command.args(info(key, text));
                }
                (key, MetadataValue::List(items)) => {
                    command = command.args(info(key, &items.join(" ")));
                }
            }
        }
        if !provides.is_empty() {
            command = command.args(info("provides", &provides.join(" ")));
        }
        if !depends.is_empty() {
            command = command.args(info("depends", &depends.join(" ")));
        }
        for (hook, script) in request.hooks.iter() {
            command = command
                .arg("--script")
                .arg(format!("{}:{script}", hook.as_str()));
        }

        command = command
            .arg("--files")
            .arg_path(&request.staged_root)
            .arg("--output")
            .arg_path(&request.output);
        if let Some(key) = &request.signing_key {
            command = command.arg("--sign-key").arg_path(key);
        }
        command
    }
}

fn info(key: &str, value: &str) -> [String; 2] {
    ["--info".to_owned(), format!("{key}:{value}")]
}

impl ArchiveWriter for ApkMkpkgWriter<'_> {
    fn write(&self, request: &ArchiveRequest) -> Result<()> {
        fs::create_dir_all(&request.state_dir).map_err(PublishError::io_at(&request.state_dir))?;
        let command = self.command(request);
        run_checked(self.executor, &command)
            .map(drop)
            .map_err(|source| PublishError::tool("create", &request.output, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use pkgseal_common::test_support::{ScriptedExecutor, failure_output};

    fn request(state_dir: Utf8PathBuf, hooks: HookScripts) -> ArchiveRequest {
        let mut metadata = PackageMetadata::default();
        metadata.insert_text("pkgdesc", "foo utilities");
        metadata.insert_text("origin", "foo");
        metadata.insert_list("provides", ["cmd:foo=1.2-r3"]);
        metadata.insert_list("depends", ["musl"]);
        metadata.insert_list("shlib_provides", ["libfoo.so.1"]);
        metadata.insert_list("shlib_requires", ["libz.so.1"]);
        metadata.insert_list("hooks", hooks.iter().map(|(_, path)| path.to_string()));
        ArchiveRequest {
            pkgname: "foo".to_owned(),
            version_release: "1.2-r3".to_owned(),
            arch: "x86_64".to_owned(),
            epoch: SourceDateEpoch::new(1_700_000_000),
            staged_root: Utf8PathBuf::from("/build/destdir/foo-1.2"),
            state_dir,
            output: Utf8PathBuf::from("/repo/main/x86_64/foo-1.2-r3.apk"),
            signing_key: Some(Utf8PathBuf::from("/keys/me.rsa")),
            metadata,
            hooks,
        }
    }

    fn template_with_hooks(root: &Utf8Path, names: &[&str]) -> HookScripts {
        let template = root.join("srcpkgs/foo.d");
        fs::create_dir_all(&template).expect("mkdir template");
        for name in names {
            fs::write(template.join(name), "#!/bin/sh\n").expect("write hook");
        }
        HookScripts::discover(&template, "foo")
    }

    #[test]
    fn mkpkg_receives_metadata_and_fixed_environment() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf8 path");
        let state = root.join("state");
        let hooks = template_with_hooks(&root, &["foo.post-install"]);
        let script = format!("post-install:{}", root.join("srcpkgs/foo.d/foo.post-install"));
        let executor = ScriptedExecutor::succeeding();
        let writer = ApkMkpkgWriter::new(&executor, "apk").with_path("/usr/bin:/bin");

        writer.write(&request(state.clone(), hooks)).expect("write succeeds");

        assert!(state.is_dir());
        let calls = executor.calls();
        let [call] = calls.as_slice() else {
            panic!("expected one call, got {calls:?}");
        };
        assert_eq!(
            call.arguments(),
            [
                "mkpkg",
                "--info", "name:foo",
                "--info", "version:1.2-r3",
                "--info", "arch:x86_64",
                "--info", "description:foo utilities",
                "--info", "origin:foo",
                "--info", "provides:cmd:foo=1.2-r3 so:libfoo.so.1",
                "--info", "depends:musl so:libz.so.1",
                "--script", script.as_str(),
                "--files", "/build/destdir/foo-1.2",
                "--output", "/repo/main/x86_64/foo-1.2-r3.apk",
                "--sign-key", "/keys/me.rsa",
            ]
        );
        assert!(call.env_cleared());
        assert_eq!(
            call.env_vars(),
            [
                ("PATH".to_owned(), "/usr/bin:/bin".to_owned()),
                ("SOURCE_DATE_EPOCH".to_owned(), "1700000000".to_owned()),
                ("TMPDIR".to_owned(), state.to_string()),
            ]
        );
    }

    #[test]
    fn scripts_are_labelled_by_hook_point() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf8 path");
        let hooks = template_with_hooks(&root, &["foo.pre-upgrade", "foo.pre-install"]);
        let executor = ScriptedExecutor::succeeding();
        let writer = ApkMkpkgWriter::new(&executor, "apk");

        writer
            .write(&request(root.join("state"), hooks))
            .expect("write succeeds");

        let calls = executor.calls();
        let args = calls[0].arguments();
        let scripts: Vec<&str> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| *flag == "--script")
            .map(|(_, value)| value.as_str())
            .collect();
        let template = root.join("srcpkgs/foo.d");
        assert_eq!(
            scripts,
            [
                format!("pre-install:{}", template.join("foo.pre-install")),
                format!("pre-upgrade:{}", template.join("foo.pre-upgrade")),
            ]
        );
    }

    #[test]
    fn mkpkg_failure_names_output() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf8 path");
        let executor = ScriptedExecutor::new(|_| Ok(failure_output("ERROR: bad info")));
        let writer = ApkMkpkgWriter::new(&executor, "apk");

        let err = writer
            .write(&request(state, HookScripts::default()))
            .expect_err("mkpkg fails");

        let msg = err.to_string();
        assert!(msg.contains("/repo/main/x86_64/foo-1.2-r3.apk"));
        assert!(msg.contains("bad info"));
    }
}

//! Deterministic index signing.
//!
//! Signatures are produced by `openssl dgst -sha1 -sign` and wrapped by
//! [`container::signature_container`] so that they can be prefixed onto a
//! compressed index. Key references in the configuration are resolved by
//! [`resolve_key_path`]; new keys are produced by [`keygen::keygen`].

pub mod container;
pub mod keygen;

use camino::{Utf8Path, Utf8PathBuf};
use pkgseal_common::{CommandExecutor, SourceDateEpoch, ToolCommand, run_checked};

pub use container::{signature_container, signature_member_name};
pub use keygen::{KeygenRequest, keygen};

use crate::error::{PublishError, Result};

/// Data to sign.
#[derive(Debug, Clone, Copy)]
pub enum SignInput<'a> {
    /// A file, passed to the signer by path.
    File(&'a Utf8Path),
    /// Raw bytes, fed to the signer on standard input.
    Bytes(&'a [u8]),
}

/// Resolves a configured key reference.
///
/// Absolute paths pass through, bare file names live under
/// `<distdir>/etc/keys`, and other relative paths are relative to `distdir`.
#[must_use]
pub fn resolve_key_path(key: &Utf8Path, distdir: &Utf8Path) -> Utf8PathBuf {
    if key.is_absolute() {
        return key.to_owned();
    }
    let is_bare_name = key.parent().is_none_or(|parent| parent.as_str().is_empty());
    if is_bare_name {
        distdir.join("etc/keys").join(key)
    } else {
        distdir.join(key)
    }
}

/// Produces signature containers through `openssl`.
#[derive(Clone, Copy)]
pub struct Signer<'a> {
    executor: &'a dyn CommandExecutor,
    openssl: &'a str,
}

impl<'a> Signer<'a> {
    /// Creates a signer running `openssl` through `executor`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, openssl: &'a str) -> Self {
        Self { executor, openssl }
    }

    /// Signs `input` with the private key at `key`.
    ///
    /// The result depends only on the key, the signed bytes and `epoch`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::MissingKey`] when `key` is not a file,
    /// [`PublishError::Tool`] when `openssl` fails, and an I/O error when the
    /// container cannot be encoded.
    pub fn sign(&self, key: &Utf8Path, input: SignInput<'_>, epoch: SourceDateEpoch) -> Result<Vec<u8>> {
        if !key.is_file() {
            return Err(PublishError::MissingKey {
                path: key.to_owned(),
            });
        }
        let key_name = key.file_name().unwrap_or(key.as_str());

        let command = ToolCommand::new(self.openssl)
            .args(["dgst", "-sha1", "-sign"])
            .arg_path(key)
            .args(["-out", "-"]);
        let (command, subject) = match input {
            SignInput::File(path) => (command.arg_path(path), path.to_string()),
            SignInput::Bytes(bytes) => (command.stdin(bytes.to_vec()), "<stdin>".to_owned()),
        };
        let output = run_checked(self.executor, &command)
            .map_err(|source| PublishError::tool("sign", subject, source))?;

        log::debug!("signed with {key_name}");
        Ok(signature_container(&output.stdout, key_name, epoch)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgseal_common::test_support::{ScriptedExecutor, failure_output, stdout_output};
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("/abs/me.rsa", "/abs/me.rsa")]
    #[case("me.rsa", "/dist/etc/keys/me.rsa")]
    #[case("keys/me.rsa", "/dist/keys/me.rsa")]
    fn resolves_key_references(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(
            resolve_key_path(Utf8Path::new(key), Utf8Path::new("/dist")),
            Utf8PathBuf::from(expected)
        );
    }

    fn key_file() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let key = Utf8PathBuf::try_from(dir.path().join("me.rsa")).expect("utf8 path");
        std::fs::write(&key, "PRIVATE KEY").expect("write key");
        (dir, key)
    }

    /// Answers every signing request with a digest of its input, making the
    /// fake signature a pure function of the signed bytes.
    fn fake_openssl() -> ScriptedExecutor {
        ScriptedExecutor::new(|command| {
            let data = match command.stdin_bytes() {
                Some(bytes) => bytes.to_vec(),
                None => std::fs::read(command.arguments().last().expect("input path"))?,
            };
            let digest: Vec<u8> = data.iter().rev().copied().collect();
            Ok(stdout_output(digest))
        })
    }

    #[test]
    fn signing_is_deterministic_and_epoch_sensitive() {
        let (_guard, key) = key_file();
        let executor = fake_openssl();
        let signer = Signer::new(&executor, "openssl");
        let data = SignInput::Bytes(b"APKINDEX");

        let first = signer.sign(&key, data, SourceDateEpoch::new(1_000)).expect("sign");
        let second = signer.sign(&key, data, SourceDateEpoch::new(1_000)).expect("sign");
        let later = signer.sign(&key, data, SourceDateEpoch::new(2_000)).expect("sign");

        assert_eq!(first, second);
        assert_ne!(first, later);
        let calls = executor.calls();
        assert_eq!(calls[0].arguments(), ["dgst", "-sha1", "-sign", key.as_str(), "-out", "-"]);
        assert_eq!(calls[0].stdin_bytes(), Some(b"APKINDEX".as_slice()));
    }

    #[test]
    fn file_input_is_passed_by_path() {
        let (guard, key) = key_file();
        let input = Utf8PathBuf::try_from(guard.path().join("APKINDEX.unsigned.tar.gz")).expect("utf8 path");
        std::fs::write(&input, b"index").expect("write input");
        let executor = fake_openssl();

        Signer::new(&executor, "openssl")
            .sign(&key, SignInput::File(&input), SourceDateEpoch::new(1))
            .expect("sign");

        let calls = executor.calls();
        assert_eq!(calls[0].arguments().last().map(String::as_str), Some(input.as_str()));
        assert!(calls[0].stdin_bytes().is_none());
    }

    #[test]
    fn missing_key_is_fatal() {
        let executor = ScriptedExecutor::succeeding();
        let err = Signer::new(&executor, "openssl")
            .sign(Utf8Path::new("/nonexistent/me.rsa"), SignInput::Bytes(b"x"), SourceDateEpoch::new(1))
            .expect_err("missing key");

        assert_eq!(err.to_string(), "non-existent private key '/nonexistent/me.rsa'");
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn signer_failure_surfaces_diagnostics() {
        let (_guard, key) = key_file();
        let executor = ScriptedExecutor::new(|_| Ok(failure_output("unable to load key file")));

        let err = Signer::new(&executor, "openssl")
            .sign(&key, SignInput::Bytes(b"x"), SourceDateEpoch::new(1))
            .expect_err("openssl fails");

        assert!(err.to_string().contains("unable to load key file"));
    }
}

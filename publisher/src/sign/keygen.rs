//! Signing key generation and configuration update.

use camino::{Utf8Path, Utf8PathBuf};
use pkgseal_common::{CommandExecutor, ToolCommand, run_checked};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::time::{SystemTime, UNIX_EPOCH};

use super::resolve_key_path;
use crate::config::{ConfigError, PublishConfig};
use crate::error::{PublishError, Result};

/// Default RSA key size in bits.
pub const DEFAULT_KEY_BITS: u32 = 2048;

/// Parameters of a key generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenRequest {
    /// Key reference; derived from the committer identity when absent.
    pub name: Option<Utf8PathBuf>,
    /// RSA key size in bits.
    pub bits: u32,
}

impl Default for KeygenRequest {
    fn default() -> Self {
        Self {
            name: None,
            bits: DEFAULT_KEY_BITS,
        }
    }
}

/// Generates a key pair and records it in the configuration file.
///
/// Returns the path of the private key; the public key is written next to
/// it with a `.pub` suffix.
///
/// # Errors
///
/// Returns [`PublishError::KeyExists`] when a key already exists at the
/// resolved path, [`PublishError::Tool`] when either `openssl` invocation
/// fails, and [`PublishError::Config`] when the configuration file cannot be
/// updated.
pub fn keygen(
    request: &KeygenRequest,
    config: &PublishConfig,
    config_path: &Utf8Path,
    executor: &dyn CommandExecutor,
) -> Result<Utf8PathBuf> {
    let name = match &request.name {
        Some(name) => name.clone(),
        None => {
            let name = Utf8PathBuf::from(default_key_name(
                executor,
                &config.tools.git,
                SystemTime::now(),
            ));
            log::warn!("no key path provided, using '{name}'");
            name
        }
    };
    let key = resolve_key_path(&name, &config.paths.distdir);
    if let Some(parent) = key.parent() {
        fs::create_dir_all(parent).map_err(PublishError::io_at(parent))?;
    }

    create_private_placeholder(&key)?;
    let genrsa = ToolCommand::new(&config.tools.openssl)
        .arg("genrsa")
        .arg("-out")
        .arg_path(&key)
        .arg(request.bits.to_string());
    if let Err(source) = run_checked(executor, &genrsa) {
        if let Err(err) = fs::remove_file(&key) {
            log::debug!("failed to remove {key}: {err}");
        }
        return Err(PublishError::tool("generate key", &key, source));
    }

    let public = Utf8PathBuf::from(format!("{key}.pub"));
    let rsa = ToolCommand::new(&config.tools.openssl)
        .arg("rsa")
        .arg("-in")
        .arg_path(&key)
        .arg("-pubout")
        .arg("-out")
        .arg_path(&public);
    run_checked(executor, &rsa)
        .map_err(|source| PublishError::tool("derive public key from", &key, source))?;
    log::info!("key successfully generated: {key}");

    record_key(config, config_path, &key)?;
    Ok(key)
}

/// Derives `<identity>-<hex seconds>.rsa` from the committer email or, failing
/// that, the login name.
#[must_use]
pub fn default_key_name(executor: &dyn CommandExecutor, git: &str, now: SystemTime) -> String {
    let command = ToolCommand::new(git).args(["config", "--get", "user.email"]);
    let email = run_checked(executor, &command)
        .ok()
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_owned())
        .filter(|email| !email.is_empty());
    let identity = email.unwrap_or_else(login_name);
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs());
    format!("{identity}-{seconds:x}.rsa")
}

fn login_name() -> String {
    ["USER", "LOGNAME"]
        .into_iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "pkgseal".to_owned())
}

/// Creates an empty, owner-only key file, refusing to replace one.
fn create_private_placeholder(key: &Utf8Path) -> Result<()> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(key)
    {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Err(PublishError::KeyExists { path: key.to_owned() })
        }
        Err(err) => Err(PublishError::io_at(key)(err)),
    }
}

/// Points `[signing] key` at `key` unless the configuration already names a
/// key.
fn record_key(config: &PublishConfig, config_path: &Utf8Path, key: &Utf8Path) -> Result<()> {
    let distdir = &config.paths.distdir;
    let reference = key
        .strip_prefix(config.keys_dir())
        .or_else(|_| key.strip_prefix(distdir))
        .unwrap_or(key);

    if let Some(existing) = &config.signing.key {
        if resolve_key_path(Utf8Path::new(existing), distdir) == key {
            log::info!("the key was already found in the config file");
        } else {
            log::warn!("signing key set in config, but not the same; you will probably need to update it");
        }
        return Ok(());
    }

    let access = |source| ConfigError::Access {
        path: config_path.to_owned(),
        source,
    };
    let entry = format!("key = {}\n", toml::Value::String(reference.to_string()));
    let text = match fs::read_to_string(config_path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(access(err).into()),
    };

    if text.lines().any(is_signing_header) {
        let mut updated = String::with_capacity(text.len() + entry.len());
        for line in text.split_inclusive('\n') {
            updated.push_str(line);
            if is_signing_header(line) {
                if !line.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(&entry);
            }
        }
        let staged = Utf8PathBuf::from(format!("{config_path}.new"));
        fs::write(&staged, updated).map_err(access)?;
        fs::rename(&staged, config_path).map_err(access)?;
    } else {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config_path)
            .map_err(access)?;
        write!(file, "\n[signing]\n{entry}").map_err(access)?;
    }
    log::info!("configuration file {config_path} updated");
    Ok(())
}

fn is_signing_header(line: &str) -> bool {
    line.trim_end().starts_with("[signing]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgseal_common::test_support::{ExpectedCall, StubExecutor, failure_output, stdout_output, success_output};
    use rstest::{fixture, rstest};
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Dist {
        _guard: TempDir,
        config_path: Utf8PathBuf,
        config: PublishConfig,
    }

    #[fixture]
    fn dist() -> Dist {
        let guard = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::try_from(guard.path().to_path_buf()).expect("utf8 temp dir");
        let mut config = PublishConfig::default();
        config.paths.distdir = root.clone();
        Dist {
            _guard: guard,
            config_path: root.join("pkgseal.toml"),
            config,
        }
    }

    /// Expects the two openssl calls for `key`, writing the private key when
    /// `genrsa` runs.
    fn openssl_calls(key: &Utf8Path) -> Vec<ExpectedCall> {
        vec![
            ExpectedCall::new(
                "openssl",
                vec!["genrsa".to_owned(), "-out".to_owned(), key.to_string(), "2048".to_owned()],
                Ok(success_output()),
            ),
            ExpectedCall::new(
                "openssl",
                vec![
                    "rsa".to_owned(),
                    "-in".to_owned(),
                    key.to_string(),
                    "-pubout".to_owned(),
                    "-out".to_owned(),
                    format!("{key}.pub"),
                ],
                Ok(success_output()),
            ),
        ]
    }

    fn named(name: &str) -> KeygenRequest {
        KeygenRequest {
            name: Some(Utf8PathBuf::from(name)),
            ..KeygenRequest::default()
        }
    }

    #[rstest]
    fn generates_owner_only_key_and_appends_signing_table(dist: Dist) {
        fs::write(&dist.config_path, "[build]\narch = \"x86_64\"\n").expect("write config");
        let key = dist.config.keys_dir().join("me.rsa");
        let executor = StubExecutor::new(openssl_calls(&key));

        let generated = keygen(&named("me.rsa"), &dist.config, &dist.config_path, &executor)
            .expect("keygen succeeds");

        assert_eq!(generated, key);
        let mode = fs::metadata(&key).expect("key metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let text = fs::read_to_string(&dist.config_path).expect("read config");
        assert_eq!(text, "[build]\narch = \"x86_64\"\n\n[signing]\nkey = \"me.rsa\"\n");
        let reloaded = PublishConfig::load(&dist.config_path).expect("config still parses");
        assert_eq!(reloaded.signing.key.as_deref(), Some("me.rsa"));
        executor.assert_finished();
    }

    #[rstest]
    fn inserts_key_into_existing_signing_table(dist: Dist) {
        fs::write(&dist.config_path, "[signing]\n\n[build]\npie = true\n").expect("write config");
        let key = dist.config.paths.distdir.join("private/dev.rsa");
        let executor = StubExecutor::new(openssl_calls(&key));

        keygen(&named("private/dev.rsa"), &dist.config, &dist.config_path, &executor)
            .expect("keygen succeeds");

        let text = fs::read_to_string(&dist.config_path).expect("read config");
        assert_eq!(text, "[signing]\nkey = \"private/dev.rsa\"\n\n[build]\npie = true\n");
        assert!(!Utf8PathBuf::from(format!("{}.new", dist.config_path)).exists());
    }

    #[rstest]
    fn existing_config_key_is_left_alone(mut dist: Dist) {
        fs::write(&dist.config_path, "[signing]\nkey = \"other.rsa\"\n").expect("write config");
        dist.config.signing.key = Some("other.rsa".to_owned());
        let key = dist.config.keys_dir().join("me.rsa");
        let executor = StubExecutor::new(openssl_calls(&key));

        keygen(&named("me.rsa"), &dist.config, &dist.config_path, &executor)
            .expect("keygen succeeds");

        let text = fs::read_to_string(&dist.config_path).expect("read config");
        assert_eq!(text, "[signing]\nkey = \"other.rsa\"\n");
    }

    #[rstest]
    fn refuses_to_overwrite_existing_key(dist: Dist) {
        let key = dist.config.keys_dir().join("me.rsa");
        fs::create_dir_all(dist.config.keys_dir()).expect("mkdir keys");
        fs::write(&key, "OLD KEY").expect("write key");
        let executor = StubExecutor::new(Vec::new());

        let err = keygen(&named("me.rsa"), &dist.config, &dist.config_path, &executor)
            .expect_err("existing key");

        assert!(matches!(err, PublishError::KeyExists { .. }));
        assert_eq!(fs::read_to_string(&key).expect("read key"), "OLD KEY");
        assert!(!dist.config_path.exists());
    }

    #[rstest]
    fn failed_generation_removes_placeholder(dist: Dist) {
        let key = dist.config.keys_dir().join("me.rsa");
        let executor = StubExecutor::new(vec![ExpectedCall::new(
            "openssl",
            vec!["genrsa".to_owned(), "-out".to_owned(), key.to_string(), "2048".to_owned()],
            Ok(failure_output("bad key size")),
        )]);

        let err = keygen(&named("me.rsa"), &dist.config, &dist.config_path, &executor)
            .expect_err("genrsa fails");

        assert!(err.to_string().contains("bad key size"));
        assert!(!key.exists());
        assert!(!dist.config_path.exists());
    }

    #[test]
    fn default_name_uses_committer_email_and_hex_time() {
        let executor = StubExecutor::new(vec![ExpectedCall::new(
            "git",
            ["config", "--get", "user.email"],
            Ok(stdout_output("dev@example.org\n")),
        )]);
        let now = UNIX_EPOCH + Duration::from_secs(0x6543_21ff);

        assert_eq!(
            default_key_name(&executor, "git", now),
            "dev@example.org-654321ff.rsa"
        );
    }

    #[test]
    fn default_name_falls_back_to_login_name() {
        let executor = StubExecutor::new(vec![ExpectedCall::new(
            "git",
            ["config", "--get", "user.email"],
            Ok(failure_output("")),
        )]);

        let name = default_key_name(&executor, "git", UNIX_EPOCH + Duration::from_secs(16));

        assert!(name.ends_with("-10.rsa"));
        assert!(!name.starts_with('-'));
    }
}

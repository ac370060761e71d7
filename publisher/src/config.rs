//! Build configuration backed by `pkgseal.toml`.
//!
//! The configuration names the distribution tree (where signing keys live
//! under `etc/keys`), the binary repository root, global hardening and debug
//! switches, and the external tools the pipeline shells out to. Every field
//! has a default so that an absent file yields a usable configuration;
//! relative paths are resolved against the directory holding the file.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::fs;
use thiserror::Error;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "pkgseal.toml";

/// Errors raised while reading or updating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read or written.
    #[error("cannot access config file {path}: {source}")]
    Access {
        /// Path of the configuration file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`PublishConfig`].
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// Path of the configuration file.
        path: Utf8PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// Filesystem layout.
    pub paths: PathsConfig,
    /// Global build switches.
    pub build: BuildConfig,
    /// External tool names.
    pub tools: ToolsConfig,
    /// Index and package signing.
    pub signing: SigningConfig,
}

/// Filesystem layout of the distribution.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Root of the distribution tree; signing keys live in `etc/keys`.
    pub distdir: Utf8PathBuf,
    /// Root of the binary repository.
    pub repository: Utf8PathBuf,
    /// Scratch directory handed to the archive writer.
    pub statedir: Utf8PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            distdir: Utf8PathBuf::from("."),
            repository: Utf8PathBuf::from("packages"),
            statedir: Utf8PathBuf::from("state"),
        }
    }
}

/// Global build switches.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Target architecture of produced archives.
    pub arch: String,
    /// Whether PIE hardening is enabled; non-PIE executables then need an
    /// explicit `nopie` allowance.
    pub pie: bool,
    /// Whether debug packages are produced at all.
    pub debug: bool,
    /// Extra repositories passed to the index builder.
    pub repositories: Vec<Utf8PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            arch: "x86_64".to_owned(),
            pie: true,
            debug: true,
            repositories: Vec::new(),
        }
    }
}

/// Names (or paths) of the external tools.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Repository index builder and archive writer.
    pub apk: String,
    /// Signature and key generation primitive.
    pub openssl: String,
    /// ELF introspection.
    pub scanelf: String,
    /// Symbol stripping.
    pub strip: String,
    /// Debug info extraction and debug links.
    pub objcopy: String,
    /// Version control, used to name generated keys.
    pub git: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            apk: "apk".to_owned(),
            openssl: "openssl".to_owned(),
            scanelf: "scanelf".to_owned(),
            strip: "strip".to_owned(),
            objcopy: "objcopy".to_owned(),
            git: "git".to_owned(),
        }
    }
}

/// Signing settings.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SigningConfig {
    /// Private key reference: absolute, a bare name under `etc/keys`, or a
    /// path relative to the distribution tree.
    pub key: Option<String>,
}

impl PublishConfig {
    /// Parses configuration text, resolving relative paths against `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not valid.
    pub fn from_toml(text: &str, base: &Utf8Path, origin: &Utf8Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_owned(),
            source,
        })?;
        config.resolve_paths(base);
        Ok(config)
    }

    /// Loads the configuration at `path`, or defaults when it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let base = path
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));

        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text, base, path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {path}, using defaults");
                let mut config = Self::default();
                config.resolve_paths(base);
                Ok(config)
            }
            Err(source) => Err(ConfigError::Access {
                path: path.to_owned(),
                source,
            }),
        }
    }

    fn resolve_paths(&mut self, base: &Utf8Path) {
        for path in [
            &mut self.paths.distdir,
            &mut self.paths.repository,
            &mut self.paths.statedir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Directory holding signing keys.
    #[must_use]
    pub fn keys_dir(&self) -> Utf8PathBuf {
        self.paths.distdir.join("etc").join("keys")
    }
}

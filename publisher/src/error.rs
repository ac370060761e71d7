//! Error types for the publishing pipeline.
//!
//! Every fatal condition aborts the current operation (one package's strip
//! pass, one assembly, one index build) and carries enough context for the
//! caller to report it: the package-relative path, the tool that failed and
//! the tool's exit text. Recoverable conditions are logged instead and never
//! surface here.

use crate::config::ConfigError;
use camino::Utf8PathBuf;
use pkgseal_common::{PatternError, ToolError};
use thiserror::Error;

/// Errors that can occur while stripping, packaging, indexing or signing.
#[derive(Debug, Error)]
pub enum PublishError {
    /// An external tool failed while processing a file or directory.
    #[error("failed to {action} {subject}: {source}")]
    Tool {
        /// What was being attempted (e.g. "strip", "attach debug link to").
        action: &'static str,
        /// The package-relative path or directory being processed.
        subject: String,
        /// The tool failure, including its exit text.
        #[source]
        source: ToolError,
    },

    /// The ELF inspector produced output that could not be parsed.
    #[error("invalid scanelf output for {path}: {output}")]
    InvalidElfProbe {
        /// Package-relative path of the file.
        path: Utf8PathBuf,
        /// The raw output.
        output: String,
    },

    /// The ELF object type is neither `ET_DYN` nor `ET_EXEC`.
    #[error("unknown type for {path}: {object_type}")]
    UnknownObjectType {
        /// Package-relative path of the file.
        path: Utf8PathBuf,
        /// The reported object type.
        object_type: String,
    },

    /// A fixed-address executable reported no interpreter.
    #[error("dynamic executable without an interpreter: {path}")]
    MissingInterpreter {
        /// Package-relative path of the file.
        path: Utf8PathBuf,
    },

    /// A non-PIE executable was found while PIE hardening is enabled.
    #[error("non-PIE executable found in PIE build: {path}")]
    NonPieExecutable {
        /// Package-relative path of the file.
        path: Utf8PathBuf,
    },

    /// Moving split debug files into the debug package tree failed.
    #[error("failed to create debug package tree {path}: {source}")]
    DebugRelocation {
        /// Destination that could not be populated.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configured private key does not exist.
    #[error("non-existent private key '{path}'")]
    MissingKey {
        /// Resolved key path.
        path: Utf8PathBuf,
    },

    /// Signing was requested but no key is configured.
    #[error("no signing key configured; set [signing] key or pass --key")]
    NoSigningKey,

    /// Key generation would overwrite an existing key.
    #[error("attempt to overwrite an existing key: {path}")]
    KeyExists {
        /// Resolved key path.
        path: Utf8PathBuf,
    },

    /// The package definition file is unreadable or invalid.
    #[error("invalid package definition {path}: {reason}")]
    InvalidPackage {
        /// Path of the definition file.
        path: Utf8PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// The ELF attribute map could not be loaded.
    #[error("invalid ELF attribute map {path}: {reason}")]
    InvalidElfMap {
        /// Path of the map file.
        path: Utf8PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// A policy pattern is malformed.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Configuration loading or updating failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An I/O operation on a specific path failed.
    #[error("I/O error on {path}: {source}")]
    IoAt {
        /// The path being accessed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A filesystem path was not valid UTF-8.
    #[error("non UTF-8 path: {0}")]
    NonUtf8Path(String),
}

impl PublishError {
    /// Wraps a tool failure with the action and subject being processed.
    #[must_use]
    pub fn tool(action: &'static str, subject: impl ToString, source: ToolError) -> Self {
        Self::Tool {
            action,
            subject: subject.to_string(),
            source,
        }
    }

    /// Returns a closure mapping an I/O error to [`PublishError::IoAt`].
    pub fn io_at(path: impl Into<Utf8PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::IoAt { path, source }
    }
}

/// Result type alias using [`PublishError`].
pub type Result<T> = std::result::Result<T, PublishError>;

//! CLI argument definitions for `pkgseal`.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary focused on orchestration.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use pkgseal_common::SourceDateEpoch;
use tracing_subscriber::filter::LevelFilter;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::sign::keygen::DEFAULT_KEY_BITS;

/// Strip, package, index and sign binary packages.
#[derive(Parser, Debug)]
#[command(name = "pkgseal")]
#[command(version, about)]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Strip a staged tree, build its archives and refresh the index:\n",
    "    $ pkgseal publish srcpkgs/foo/package.toml --elf-map build/foo/elfs.json\n\n",
    "  Drop superseded archives from a repository:\n",
    "    $ pkgseal prune packages/main\n\n",
    "  Generate a signing key and record it in pkgseal.toml:\n",
    "    $ pkgseal keygen",
))]
pub struct Cli {
    /// Configuration file.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: Utf8PathBuf,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet",
        global = true
    )]
    pub verbosity: u8,

    /// Only report errors.
    #[arg(short, long, conflicts_with = "verbosity", global = true)]
    pub quiet: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Maps `-v` and `-q` to the most detailed level reported on stderr.
    ///
    /// `-q` keeps errors only; the default shows progress and each `-v` adds
    /// a level of detail.
    #[must_use]
    pub const fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::ERROR;
        }
        match self.verbosity {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Strip the staged tree of a package and split its debug information.
    Strip(StripArgs),

    /// Assemble the archives of an already stripped package.
    Package(PackageArgs),

    /// Strip, assemble and index a package in one go.
    Publish(PublishArgs),

    /// Regenerate repository indexes.
    Index(IndexArgs),

    /// Delete superseded archives from a repository.
    Prune(PruneArgs),

    /// Write the signature container for a file.
    Sign(SignArgs),

    /// Generate a signing key pair.
    Keygen(KeygenArgs),
}

/// Arguments for the strip command.
#[derive(Args, Debug, Clone)]
pub struct StripArgs {
    /// Package definition file.
    #[arg(value_name = "PACKAGE")]
    pub package: Utf8PathBuf,

    /// JSON map of ELF attributes keyed by package-relative path.
    #[arg(long, value_name = "FILE")]
    pub elf_map: Option<Utf8PathBuf>,
}

/// Arguments for the package command.
#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    /// Package definition file.
    #[arg(value_name = "PACKAGE")]
    pub package: Utf8PathBuf,

    /// JSON map of ELF attributes used to fill shared-library lists.
    #[arg(long, value_name = "FILE")]
    pub elf_map: Option<Utf8PathBuf>,

    /// Reproducibility timestamp [default: SOURCE_DATE_EPOCH, then the
    /// definition's mtime].
    #[arg(long, value_name = "SECONDS")]
    pub epoch: Option<SourceDateEpoch>,

    /// Rebuild archives even when they are newer than the definition.
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the publish command.
#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// Package definition file.
    #[arg(value_name = "PACKAGE")]
    pub package: Utf8PathBuf,

    /// JSON map of ELF attributes keyed by package-relative path.
    #[arg(long, value_name = "FILE")]
    pub elf_map: Option<Utf8PathBuf>,

    /// Reproducibility timestamp [default: SOURCE_DATE_EPOCH, then the
    /// definition's mtime].
    #[arg(long, value_name = "SECONDS")]
    pub epoch: Option<SourceDateEpoch>,

    /// Rebuild archives even when they are newer than the definition.
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the index command.
#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Repository directories holding archives.
    #[arg(value_name = "DIR", required = true)]
    pub dirs: Vec<Utf8PathBuf>,

    /// Reproducibility timestamp [default: SOURCE_DATE_EPOCH, then the
    /// directory's mtime].
    #[arg(long, value_name = "SECONDS")]
    pub epoch: Option<SourceDateEpoch>,
}

/// Arguments for the prune command.
#[derive(Args, Debug, Clone)]
pub struct PruneArgs {
    /// Repository root holding one directory per architecture.
    #[arg(value_name = "ROOT")]
    pub root: Utf8PathBuf,

    /// Architecture to prune [default: the configured one].
    #[arg(short, long, value_name = "ARCH")]
    pub arch: Option<String>,
}

/// Arguments for the sign command.
#[derive(Args, Debug, Clone)]
pub struct SignArgs {
    /// File to sign.
    #[arg(value_name = "FILE")]
    pub file: Utf8PathBuf,

    /// Where to write the container [default: FILE.sig].
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<Utf8PathBuf>,

    /// Private key [default: the configured one].
    #[arg(short, long, value_name = "KEY")]
    pub key: Option<Utf8PathBuf>,

    /// Reproducibility timestamp [default: SOURCE_DATE_EPOCH, then the
    /// file's mtime].
    #[arg(long, value_name = "SECONDS")]
    pub epoch: Option<SourceDateEpoch>,
}

impl SignArgs {
    /// Returns the container path.
    #[must_use]
    pub fn output_path(&self) -> Utf8PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(format!("{}.sig", self.file)))
    }
}

/// Arguments for the keygen command.
#[derive(Args, Debug, Clone)]
pub struct KeygenArgs {
    /// Key name or path [default: derived from the committer identity].
    #[arg(value_name = "KEY")]
    pub name: Option<Utf8PathBuf>,

    /// RSA key size in bits.
    #[arg(short, long, value_name = "BITS", default_value_t = DEFAULT_KEY_BITS)]
    pub bits: u32,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;

//! pkgseal publisher library.
//!
//! This crate turns the staged installation tree of a finished build into a
//! signed, deduplicated repository of installable archives. It is used by the
//! `pkgseal` binary and can be driven programmatically, with every external
//! tool invocation going through a [`pkgseal_common::CommandExecutor`].
//!
//! # Modules
//!
//! - [`assemble`] - Lock-guarded archive assembly
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - `pkgseal.toml` loading
//! - [`error`] - Error types for the pipeline
//! - [`package`] - Package definitions and archive naming
//! - [`pipeline`] - Strip, assemble and index orchestration
//! - [`repo`] - Repository scanning, pruning and index generation
//! - [`sign`] - Index signing and key generation
//! - [`strip`] - ELF classification, stripping and debug splitting

pub mod assemble;
pub mod cli;
pub mod config;
pub mod error;
pub mod package;
pub mod pipeline;
pub mod repo;
pub mod sign;
pub mod strip;

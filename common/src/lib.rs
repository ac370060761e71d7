//! Shared infrastructure for the pkgseal publishing pipeline: external tool
//! execution, reproducibility epochs, package-relative path policies and the
//! apk version order.

pub mod epoch;
pub mod exec;
pub mod pattern;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod version;

pub use epoch::{SOURCE_DATE_EPOCH, SourceDateEpoch};
pub use exec::{CommandExecutor, SystemCommandExecutor, ToolCommand, ToolError, run_checked};
pub use pattern::{PathPattern, PatternError, PatternSet};
pub use version::{compare_versions, is_valid_version};

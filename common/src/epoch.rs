//! Reproducibility epoch.
//!
//! Every timestamp pkgseal embeds (archive metadata, signature member mtime,
//! gzip header mtime, the `SOURCE_DATE_EPOCH` handed to tools) is taken from
//! a single [`SourceDateEpoch`] instead of the wall clock.

use camino::Utf8Path;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the environment variable carrying the epoch.
pub const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// Seconds since the Unix epoch used in place of wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourceDateEpoch(u64);

impl SourceDateEpoch {
    /// Wraps a raw number of seconds.
    #[must_use]
    pub const fn new(seconds: u64) -> Self {
        Self(seconds)
    }

    /// Returns the number of seconds.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        self.0
    }

    /// Reads the epoch from `SOURCE_DATE_EPOCH`, if set and numeric.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(SOURCE_DATE_EPOCH).ok()?.parse().ok()
    }

    /// Uses the modification time of `path` as the epoch.
    ///
    /// # Errors
    ///
    /// Returns an error when the file metadata cannot be read.
    pub fn from_mtime(path: &Utf8Path) -> io::Result<Self> {
        let modified = path.metadata()?.modified()?;
        Ok(Self::from_system_time(modified))
    }

    /// Converts a [`SystemTime`], clamping times before 1970 to zero.
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        Self(
            time.duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_secs()),
        )
    }
}

impl fmt::Display for SourceDateEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceDateEpoch {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u64> for SourceDateEpoch {
    fn from(seconds: u64) -> Self {
        Self(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_trimmed_seconds() {
        assert_eq!(
            " 1700000000\n".parse::<SourceDateEpoch>().ok(),
            Some(SourceDateEpoch::new(1_700_000_000))
        );
        assert!("yesterday".parse::<SourceDateEpoch>().is_err());
    }

    #[test]
    fn system_time_before_unix_epoch_clamps_to_zero() {
        let before = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(SourceDateEpoch::from_system_time(before).seconds(), 0);
    }

    #[test]
    fn displays_as_plain_integer() {
        assert_eq!(SourceDateEpoch::new(42).to_string(), "42");
    }
}

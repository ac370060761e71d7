//! Archive file name parsing.
//!
//! Archive names follow `<name>-<version>-r<revision>.apk`. The name ends at
//! the second-to-last hyphen of the stem, so package names may contain
//! hyphens while versions may not. The name itself may be empty.

use crate::package::ARCHIVE_EXTENSION;

/// The parts of an archive file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveName<'a> {
    /// Full file name.
    pub file_name: &'a str,
    /// Package name.
    pub name: &'a str,
    /// `<version>-r<revision>`.
    pub version_release: &'a str,
}

impl<'a> ArchiveName<'a> {
    /// Splits `file_name`, returning `None` when it is not an archive name
    /// or has fewer than two hyphens.
    #[must_use]
    pub fn parse(file_name: &'a str) -> Option<Self> {
        let stem = file_name
            .strip_suffix(ARCHIVE_EXTENSION)?
            .strip_suffix('.')?;
        let (rest, _revision) = stem.rsplit_once('-')?;
        let (name, _version) = rest.rsplit_once('-')?;
        let version_release = stem.get(name.len() + 1..)?;
        Some(Self {
            file_name,
            name,
            version_release,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("foo-1.0-r0.apk", "foo", "1.0-r0")]
    #[case("foo-dbg-1.2-r3.apk", "foo-dbg", "1.2-r3")]
    #[case("python-foo-bar-2.0_rc1-r10.apk", "python-foo-bar", "2.0_rc1-r10")]
    #[case("-1.0-r0.apk", "", "1.0-r0")]
    fn splits_at_second_to_last_hyphen(
        #[case] file_name: &str,
        #[case] name: &str,
        #[case] version_release: &str,
    ) {
        let parsed = ArchiveName::parse(file_name).expect("valid name");
        assert_eq!(parsed.name, name);
        assert_eq!(parsed.version_release, version_release);
        assert_eq!(parsed.file_name, file_name);
    }

    #[rstest]
    #[case("foo.apk")]
    #[case("foo-1.0.apk")]
    #[case("foo-1.0-r0.tar.gz")]
    #[case("foo-1.0-r0apk")]
    fn rejects_malformed_names(#[case] file_name: &str) {
        assert!(ArchiveName::parse(file_name).is_none());
    }
}

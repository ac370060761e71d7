//! Archive metadata handed to the archive writer.

use crate::package::{HookScripts, PackageInfo};

/// A metadata value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    /// A single text value.
    Text(String),
    /// A list of values.
    List(Vec<String>),
}

/// Insertion-ordered metadata map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    entries: Vec<(&'static str, MetadataValue)>,
}

impl PackageMetadata {
    /// Builds the metadata of the main or debug archive of `package`.
    ///
    /// Debug archives depend on the exact version-release of their main
    /// archive and carry no provides, shlib lists or hooks.
    #[must_use]
    pub fn for_archive(package: &PackageInfo, debug: bool, hooks: &HookScripts) -> Self {
        let mut metadata = Self::default();

        let pkgdesc = if debug {
            format!("{} (debug files)", package.short_desc)
        } else {
            package.short_desc.clone()
        };
        metadata.insert_text("pkgdesc", pkgdesc);
        metadata.insert_text("url", &package.url);
        metadata.insert_text("maintainer", &package.maintainer);
        metadata.insert_text("origin", package.origin());
        metadata.insert_text("license", &package.license);
        if let Some(revision) = &package.git_revision {
            let suffix = if package.git_dirty { "-dirty" } else { "" };
            metadata.insert_text("commit", format!("{revision}{suffix}"));
        }

        if debug {
            metadata.insert_list(
                "depends",
                [format!("{}={}", package.pkgname, package.version_release())],
            );
            return metadata;
        }

        if !package.provides.is_empty() {
            metadata.insert_list("provides", package.provides.iter().cloned());
        }
        metadata.insert_list("depends", package.depends.iter().cloned());
        if let Some(provides) = &package.shlib_provides {
            metadata.insert_list("shlib_provides", provides.iter().cloned());
        }
        if let Some(requires) = &package.shlib_requires {
            metadata.insert_list("shlib_requires", requires.iter().cloned());
        }
        if !hooks.is_empty() {
            metadata.insert_list("hooks", hooks.iter().map(|(_, path)| path.to_string()));
        }
        metadata
    }

    /// Appends or replaces a text entry.
    pub fn insert_text(&mut self, key: &'static str, value: impl Into<String>) {
        self.insert(key, MetadataValue::Text(value.into()));
    }

    /// Appends or replaces a list entry.
    pub fn insert_list<I, S>(&mut self, key: &'static str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(
            key,
            MetadataValue::List(values.into_iter().map(Into::into).collect()),
        );
    }

    fn insert(&mut self, key: &'static str, value: MetadataValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (*k == key).then_some(v))
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Returns the keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(k, _)| *k).collect()
    }
}

//! Package-relative path policies.
//!
//! Allow-lists such as `nostrip` and `nopie` are glob patterns matched
//! against paths relative to a package's install root. Matching is anchored
//! at the right: a relative pattern with `n` components matches when it
//! matches the last `n` components of the path, one component at a time, so
//! `*` never crosses a `/`. A pattern starting with `/` must match the whole
//! path and the path must itself be absolute; package-relative paths never
//! are, so such patterns only ever match absolute paths.

use camino::Utf8Path;
use glob::{MatchOptions, Pattern};
use thiserror::Error;

const COMPONENT_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Error raised for an unparsable policy pattern.
#[derive(Debug, Error)]
#[error("invalid path pattern '{pattern}': {reason}")]
pub struct PatternError {
    /// The offending pattern text.
    pub pattern: String,
    /// Why it was rejected.
    pub reason: String,
}

/// A single right-anchored path glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    absolute: bool,
    components: Vec<Pattern>,
}

impl PathPattern {
    /// Parses `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when the pattern is empty or a component is
    /// not a valid glob.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let absolute = pattern.starts_with('/');
        let components = pattern
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .map(|part| {
                Pattern::new(part).map_err(|err| PatternError {
                    pattern: pattern.to_owned(),
                    reason: err.msg.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if components.is_empty() {
            return Err(PatternError {
                pattern: pattern.to_owned(),
                reason: "pattern is empty".to_owned(),
            });
        }

        Ok(Self {
            source: pattern.to_owned(),
            absolute,
            components,
        })
    }

    /// Returns the pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` when `path` matches this pattern.
    #[must_use]
    pub fn matches(&self, path: &Utf8Path) -> bool {
        if self.absolute && !path.is_absolute() {
            return false;
        }

        let parts: Vec<&str> = path
            .as_str()
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .collect();

        if parts.len() < self.components.len()
            || (self.absolute && parts.len() != self.components.len())
        {
            return false;
        }

        parts
            .iter()
            .rev()
            .zip(self.components.iter().rev())
            .all(|(part, pattern)| pattern.matches_with(part, COMPONENT_MATCH))
    }
}

/// An allow-list of [`PathPattern`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    patterns: Vec<PathPattern>,
}

impl PatternSet {
    /// Parses every pattern in `patterns`.
    ///
    /// # Errors
    ///
    /// Returns the first [`PatternError`] encountered.
    pub fn new<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| PathPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Returns the first pattern matching `path`, if any.
    #[must_use]
    pub fn find_match(&self, path: &Utf8Path) -> Option<&PathPattern> {
        self.patterns.iter().find(|p| p.matches(path))
    }

    /// Returns `true` when any pattern matches `path`.
    #[must_use]
    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.find_match(path).is_some()
    }

    /// Returns `true` when the set holds no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

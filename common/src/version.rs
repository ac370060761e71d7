//! apk version ordering.
//!
//! Version-release strings such as `1.2.3_rc1-r4` follow the apk grammar:
//!
//! ```text
//! digits ('.' digits)* letter? ('_' suffix digits?)* ('-r' digits)?
//! ```
//!
//! where `suffix` is one of `alpha`, `beta`, `pre`, `rc` (pre-releases,
//! ordered before the bare version) or `cvs`, `svn`, `git`, `hg`, `p`
//! (post-releases, ordered after it).

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Suffix {
    Alpha,
    Beta,
    Pre,
    Rc,
    Cvs,
    Svn,
    Git,
    Hg,
    P,
}

impl Suffix {
    const ALL: [(&'static str, Self); 9] = [
        ("alpha", Self::Alpha),
        ("beta", Self::Beta),
        ("pre", Self::Pre),
        ("rc", Self::Rc),
        ("cvs", Self::Cvs),
        ("svn", Self::Svn),
        ("git", Self::Git),
        ("hg", Self::Hg),
        ("p", Self::P),
    ];

    fn is_pre_release(self) -> bool {
        self <= Self::Rc
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Version<'a> {
    numbers: Vec<&'a str>,
    letter: Option<char>,
    suffixes: Vec<(Suffix, u64)>,
    revision: u64,
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn parse(version: &str) -> Option<Version<'_>> {
    let (body, revision) = match version.rsplit_once("-r") {
        Some((body, rev)) if !rev.is_empty() && rev.bytes().all(|b| b.is_ascii_digit()) => {
            (body, rev.parse().ok()?)
        }
        _ => (version, 0),
    };

    let mut numbers = Vec::new();
    let mut rest = body;
    loop {
        let (digits, tail) = split_digits(rest);
        if digits.is_empty() {
            return None;
        }
        numbers.push(digits);
        match tail.strip_prefix('.') {
            Some(next) => rest = next,
            None => {
                rest = tail;
                break;
            }
        }
    }

    let mut letter = None;
    if let Some(c) = rest.chars().next().filter(char::is_ascii_lowercase) {
        letter = Some(c);
        rest = rest.strip_prefix(c).unwrap_or(rest);
    }

    let mut suffixes = Vec::new();
    while let Some(tail) = rest.strip_prefix('_') {
        let (name, after) = tail.split_at(
            tail.find(|c: char| !c.is_ascii_lowercase())
                .unwrap_or(tail.len()),
        );
        let kind = Suffix::ALL
            .iter()
            .find(|(label, _)| *label == name)
            .map(|(_, kind)| *kind)?;
        let (digits, remaining) = split_digits(after);
        let number = if digits.is_empty() { 0 } else { digits.parse().ok()? };
        suffixes.push((kind, number));
        rest = remaining;
    }

    rest.is_empty().then_some(Version {
        numbers,
        letter,
        suffixes,
        revision,
    })
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_component(index: usize, a: &str, b: &str) -> Ordering {
    // Later components with a leading zero compare as decimal fractions.
    if index > 0 && (a.starts_with('0') || b.starts_with('0')) {
        a.cmp(b)
    } else {
        compare_numeric(a, b)
    }
}

fn compare_parsed(a: &Version<'_>, b: &Version<'_>) -> Ordering {
    for (index, (x, y)) in a.numbers.iter().zip(&b.numbers).enumerate() {
        let ord = compare_component(index, x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    let ord = a.numbers.len().cmp(&b.numbers.len());
    if ord != Ordering::Equal {
        return ord;
    }

    let ord = a.letter.cmp(&b.letter);
    if ord != Ordering::Equal {
        return ord;
    }

    for (x, y) in a.suffixes.iter().zip(&b.suffixes) {
        let ord = x.cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    let common = a.suffixes.len().min(b.suffixes.len());
    match (a.suffixes.get(common), b.suffixes.get(common)) {
        (Some((kind, _)), None) => {
            return if kind.is_pre_release() {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }
        (None, Some((kind, _))) => {
            return if kind.is_pre_release() {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }
        _ => {}
    }

    a.revision.cmp(&b.revision)
}

/// Compares two version-release strings under the apk total order.
///
/// Strings that do not follow the apk grammar fall back to a byte-wise
/// comparison so the order stays total.
///
/// # Examples
///
/// ```
/// use pkgseal_common::version::compare_versions;
/// use std::cmp::Ordering;
///
/// assert_eq!(compare_versions("1.1-r0", "1.0-r9"), Ordering::Greater);
/// assert_eq!(compare_versions("2.0_rc1-r0", "2.0-r0"), Ordering::Less);
/// ```
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(x), Some(y)) => compare_parsed(&x, &y),
        _ => a.cmp(b),
    }
}

/// Returns `true` when `version` follows the apk version grammar.
#[must_use]
pub fn is_valid_version(version: &str) -> bool {
    parse(version).is_some()
}

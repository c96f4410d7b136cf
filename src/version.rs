// src/version.rs

//! Package editions and RPM-style version comparison
//!
//! An [`Edition`] is the `[epoch:]version[-release]` triple attached to every
//! resolvable and to constrained capabilities. Ordering between editions uses
//! the `rpmvercmp` segment algorithm; [`Edition::compare`] leaves the release
//! out of the comparison when either side has none, which is what capability
//! matching needs ("foo >= 1.0" is satisfied by "foo-1.0-3").

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version, release and epoch of a resolvable
///
/// The derived `Ord` is structural and only used to keep capabilities in
/// ordered sets. Use [`Edition::compare`] for version semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edition {
    pub epoch: u32,
    pub version: String,
    pub release: String,
}

impl Edition {
    pub fn new(version: impl Into<String>, release: impl Into<String>, epoch: u32) -> Self {
        Self {
            epoch,
            version: version.into(),
            release: release.into(),
        }
    }

    /// Compare two editions the way rpm compares EVRs
    pub fn compare(&self, other: &Edition) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match rpmvercmp(&self.version, &other.version) {
            Ordering::Equal => {}
            ord => return ord,
        }

        if self.release.is_empty() || other.release.is_empty() {
            return Ordering::Equal;
        }

        rpmvercmp(&self.release, &other.release)
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if !self.release.is_empty() {
            write!(f, "-{}", self.release)?;
        }
        Ok(())
    }
}

impl FromStr for Edition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = |reason: &str| Error::ParseError(format!("Invalid edition '{}': {}", s, reason));

        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) => {
                let epoch = e.parse::<u32>().map_err(|_| bad("epoch is not a number"))?;
                (epoch, rest)
            }
            None => (0, s),
        };

        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v, r),
            None => (rest, ""),
        };

        if version.is_empty() {
            return Err(bad("empty version"));
        }

        Ok(Edition::new(version, release, epoch))
    }
}

/// rpm's segment-wise version comparison
///
/// Handles `~` (sorts before everything, including the end of the string)
/// and `^` (sorts after the end of the string but before anything else).
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    let is_sep = |c: u8| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^';

    loop {
        while let Some(&c) = one.first() {
            if !is_sep(c) {
                break;
            }
            one = &one[1..];
        }
        while let Some(&c) = two.first() {
            if !is_sep(c) {
                break;
            }
            two = &two[1..];
        }

        if one.first() == Some(&b'~') || two.first() == Some(&b'~') {
            if one.first() != Some(&b'~') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'~') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.first() == Some(&b'^') || two.first() == Some(&b'^') {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if one[0] != b'^' {
                return Ordering::Greater;
            }
            if two[0] != b'^' {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let segment_len = |s: &[u8]| {
            s.iter()
                .take_while(|c| {
                    if numeric {
                        c.is_ascii_digit()
                    } else {
                        c.is_ascii_alphabetic()
                    }
                })
                .count()
        };

        let len1 = segment_len(one);
        let len2 = segment_len(two);

        // Segments of different types: numeric is newer
        if len2 == 0 {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let (seg1, seg2) = (&one[..len1], &two[..len2]);

        let ord = if numeric {
            let seg1 = trim_leading_zeros(seg1);
            let seg2 = trim_leading_zeros(seg2);
            seg1.len().cmp(&seg2.len()).then_with(|| seg1.cmp(seg2))
        } else {
            seg1.cmp(seg2)
        };

        if ord != Ordering::Equal {
            return ord;
        }

        one = &one[len1..];
        two = &two[len2..];
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

fn trim_leading_zeros(s: &[u8]) -> &[u8] {
    let zeros = s.iter().take_while(|&&c| c == b'0').count();
    &s[zeros..]
}

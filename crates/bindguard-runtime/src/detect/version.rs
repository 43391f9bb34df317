//! Version ranking for installation folder names.
//!
//! Folder names such as `cuda-12.4` or `v11.8` carry a version suffix. Names
//! without a parsable suffix are kept, ranked after every parsed name, in
//! their original order.

use std::cmp::Ordering;

/// Parsed version of a folder name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKey {
    /// `(major, minor, patch)`, missing components are zero.
    Valid([u64; 3]),
    Invalid,
}

impl VersionKey {
    /// Parse the version suffix of an installation folder name.
    ///
    /// The suffix is whatever follows the first `-`, or the whole name with a
    /// leading `v` removed. Only the leading digits of each dot-separated
    /// component count, so `12.0-rc1` parses as `12.0.0`.
    pub fn parse(name: &str) -> Self {
        let suffix = match name.split_once('-') {
            Some((_, rest)) => rest,
            None => name.strip_prefix(['v', 'V']).unwrap_or(name),
        };

        let mut parts = [0_u64; 3];
        let mut parsed = 0;
        for (slot, component) in parts.iter_mut().zip(suffix.split('.')) {
            let digits: String = component
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            let Ok(value) = digits.parse::<u64>() else {
                break;
            };
            *slot = value;
            parsed += 1;
            if digits.len() != component.len() {
                break;
            }
        }

        if parsed == 0 {
            Self::Invalid
        } else {
            Self::Valid(parts)
        }
    }

    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Ordering for a descending rank: higher versions first, valid before
/// invalid, invalid names equal to each other.
pub fn compare_descending(a: &VersionKey, b: &VersionKey) -> Ordering {
    match (a, b) {
        (VersionKey::Valid(x), VersionKey::Valid(y)) => y.cmp(x),
        (VersionKey::Valid(_), VersionKey::Invalid) => Ordering::Less,
        (VersionKey::Invalid, VersionKey::Valid(_)) => Ordering::Greater,
        (VersionKey::Invalid, VersionKey::Invalid) => Ordering::Equal,
    }
}

/// Sort `items` by the version embedded in their name, newest first.
///
/// The sort is stable, so ties keep discovery order.
pub fn rank_by_version<T>(items: Vec<T>, name_of: impl Fn(&T) -> &str) -> Vec<T> {
    let mut keyed: Vec<(VersionKey, T)> = items
        .into_iter()
        .map(|item| (VersionKey::parse(name_of(&item)), item))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare_descending(a, b));
    keyed.into_iter().map(|(_, item)| item).collect()
}

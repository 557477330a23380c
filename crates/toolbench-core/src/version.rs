//! Ordering for toolchain package versions.
//!
//! Package versions are free-form (`1.58`, `2.1.0-r3`, `5.3.1.4`), so they are
//! split into runs of digits and runs of letters and compared piecewise:
//! numbers numerically, words lexically, a number before a word, and a
//! shorter version before a longer one sharing its prefix (`1.2 < 1.2.1`).

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Component<'a> {
    Numeric(u64),
    Alpha(&'a str),
}

impl Ord for Component<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Component::Numeric(a), Component::Numeric(b)) => a.cmp(b),
            (Component::Alpha(a), Component::Alpha(b)) => a.cmp(b),
            (Component::Numeric(_), Component::Alpha(_)) => Ordering::Greater,
            (Component::Alpha(_), Component::Numeric(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Component<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn components(version: &str) -> Vec<Component<'_>> {
    let mut parts = Vec::new();
    let bytes = version.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let first = bytes[start];
        if !first.is_ascii_alphanumeric() {
            start += 1;
            continue;
        }
        let numeric = first.is_ascii_digit();
        let mut end = start;
        while end < bytes.len()
            && bytes[end].is_ascii_alphanumeric()
            && bytes[end].is_ascii_digit() == numeric
        {
            end += 1;
        }
        let run = &version[start..end];
        parts.push(if numeric {
            Component::Numeric(run.parse().unwrap_or(u64::MAX))
        } else {
            Component::Alpha(run)
        });
        start = end;
    }
    parts
}

pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left_parts = components(left);
    let right_parts = components(right);
    for (a, b) in left_parts.iter().zip(right_parts.iter()) {
        match a.cmp(b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    left_parts.len().cmp(&right_parts.len())
}

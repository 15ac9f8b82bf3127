//! Dot-segment numeric version comparison.
//!
//! Script versions look like `0.26.0.20170108.21732`, which is not semver, so
//! each dot-separated segment is compared as an unsigned integer. Missing
//! trailing segments count as zero. A segment that is not a number makes the
//! whole version incomparable.

use std::cmp::Ordering;

fn segments(version: &str) -> Option<Vec<u64>> {
    let version = version.trim();
    if version.is_empty() {
        return None;
    }
    version
        .split('.')
        .map(|segment| segment.trim().parse::<u64>().ok())
        .collect()
}

/// Compare two versions, `None` when either is not numeric
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    let a = segments(a)?;
    let b = segments(b)?;
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(Ordering::Equal)
}

/// True only when `candidate` is strictly newer than `current`
pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Some(Ordering::Greater)
}

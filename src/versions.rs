//! Release-title version parsing and comparison
//!
//! Versions appear in release titles in many shapes ("v1.2.3",
//! "Build 12345", "Update 5", "Patch 1.2"). An ordered pattern set extracts
//! the first numeric version; comparison treats versions as zero-padded
//! numeric tuples, which gives a total order.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// Ordered version patterns; the first match wins and its first capture
/// group is the version string.
const VERSION_PATTERNS: &[&str] = &[
    // v1.2 / v1.2.3 anywhere in the title
    r"(?i)\bv(\d+(?:\.\d+)+)",
    // leading v1.2 (covers titles that start with the version)
    r"(?i)^v(\d+(?:\.\d+)*)",
    // spelled-out "version 1.2"
    r"(?i)\bversion[ ._]?(\d+(?:\.\d+)*)",
    // bare dotted triple 1.2.3
    r"\b(\d+\.\d+\.\d+)\b",
    // build 12345
    r"(?i)\bbuild[ ._]?(\d+)",
    // update 5
    r"(?i)\bupdate[ ._]?(\d+)",
    // short u5
    r"(?i)\bu(\d+)\b",
    // short r5
    r"(?i)\br(\d+)\b",
    // patch 1.2
    r"(?i)\bpatch[ ._]?(\d+(?:\.\d+)*)",
];

fn compiled_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        VERSION_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Extract a version string from a release title, if one is present
pub fn parse_version(title: &str) -> Option<String> {
    for pattern in compiled_patterns() {
        if let Some(captures) = pattern.captures(title) {
            if let Some(group) = captures.get(1) {
                return Some(group.as_str().to_string());
            }
        }
    }
    None
}

/// Remove every version pattern from a string (used when parsing library
/// folder names back into titles)
pub fn strip_version_patterns(input: &str) -> String {
    let mut out = input.to_string();
    for pattern in compiled_patterns() {
        out = pattern.replace_all(&out, " ").into_owned();
    }
    out
}

/// Compare two version strings as zero-padded numeric tuples
///
/// Segments are split on `.` and parsed as integers (non-numeric segments
/// count as 0); the shorter tuple is zero-padded, then the tuples compare
/// lexicographically. This is a total order: reflexive, antisymmetric,
/// transitive.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|segment| segment.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };

    let mut left = parse(a);
    let mut right = parse(b);
    let len = left.len().max(right.len());
    left.resize(len, 0);
    right.resize(len, 0);

    left.cmp(&right)
}

/// True when `candidate` is strictly newer than `installed`
pub fn is_newer_version(candidate: &str, installed: &str) -> bool {
    compare_versions(candidate, installed) == Ordering::Greater
}

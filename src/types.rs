//! Core domain types for apksift.
//!
//! A [`SecretLocator`] is a named, compiled byte-pattern; a
//! [`SecretResult`] is one match of a locator against one line of a
//! decompiled file; a [`DecompileOutcome`] records one
//! `(input, decompiler)` attempt.

use regex::bytes::Regex;
use serde::Deserialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

/// Which capture group of a locator's pattern holds the secret.
///
/// `Index(0)` (the default) extracts the whole match.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SecretGroup {
    Index(usize),
    Name(String),
}

impl Default for SecretGroup {
    fn default() -> Self {
        Self::Index(0)
    }
}

impl fmt::Display for SecretGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(n) => write!(f, "{n:?}"),
        }
    }
}

/// A named regex plus metadata identifying one class of secret.
///
/// Equality and hashing are defined over the raw pattern string so that
/// logically identical patterns loaded from different rule files collapse
/// to a single locator.
#[derive(Debug, Clone)]
pub struct SecretLocator {
    /// Stable kebab-case identifier.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Compiled byte-oriented pattern.
    pub pattern: Regex,
    /// The pattern exactly as it appeared in the rule file, inline flag
    /// tokens included. Used as the deduplication key.
    pub pattern_source: String,
    /// Capture group to extract as the secret.
    pub secret_group: SecretGroup,
    pub description: Option<String>,
    pub confidence: Option<String>,
    pub severity: Option<String>,
    pub tags: Vec<String>,
}

impl SecretLocator {
    /// Extracts the secret bytes from a capture set, honoring
    /// `secret_group`. Returns `None` when the group did not participate
    /// in the match.
    #[must_use]
    pub fn secret_of<'h>(&self, caps: &regex::bytes::Captures<'h>) -> Option<&'h [u8]> {
        match &self.secret_group {
            SecretGroup::Index(i) => caps.get(*i).map(|m| m.as_bytes()),
            SecretGroup::Name(n) => caps.name(n).map(|m| m.as_bytes()),
        }
    }
}

impl PartialEq for SecretLocator {
    fn eq(&self, other: &Self) -> bool {
        self.pattern_source == other.pattern_source
    }
}

impl Eq for SecretLocator {}

impl Hash for SecretLocator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern_source.hash(state);
    }
}

impl fmt::Display for SecretLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// One match of a locator against one line of a scanned file.
///
/// Equality and hashing cover only the secret bytes; the pipeline uses
/// this for unique-secret counting.
#[derive(Debug, Clone)]
pub struct SecretResult {
    /// Raw bytes extracted by the locator's secret group.
    pub secret: Vec<u8>,
    /// The decompiled file the secret was found in.
    pub file_path: PathBuf,
    /// 1-based line number within that file.
    pub line_number: u64,
    pub locator: Arc<SecretLocator>,
}

impl SecretResult {
    /// Renders the secret for display: UTF-8 when valid, ASCII-escaped
    /// otherwise.
    #[must_use]
    pub fn secret_string(&self) -> String {
        match std::str::from_utf8(&self.secret) {
            Ok(s) => s.to_string(),
            Err(_) => self.secret.escape_ascii().to_string(),
        }
    }
}

impl PartialEq for SecretResult {
    fn eq(&self, other: &Self) -> bool {
        self.secret == other.secret
    }
}

impl Eq for SecretResult {}

impl Hash for SecretResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.secret.hash(state);
    }
}

/// The record describing one `(input, decompiler)` attempt.
#[derive(Debug, Clone)]
pub struct DecompileOutcome {
    /// The artifact the decompiler was pointed at.
    pub input_path: PathBuf,
    /// `<working_dir>/<stem><output_suffix>/<binary_name>`.
    pub output_dir: PathBuf,
    /// Recursive set of regular files under `output_dir`, when indexed.
    pub decompiled_files: Option<Vec<PathBuf>>,
    /// Whether the decompiler exited with status 0.
    pub success: bool,
}

impl DecompileOutcome {
    /// True when this outcome produced at least one file to scan.
    #[must_use]
    pub fn scannable(&self) -> bool {
        self.success && self.decompiled_files.as_ref().is_some_and(|f| !f.is_empty())
    }
}

// Compile-time assertions for thread safety: both result types cross
// worker-pool boundaries.
#[cfg(test)]
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}

    assert_send_sync::<SecretLocator>();
    assert_send_sync::<SecretResult>();
    assert_send_sync::<DecompileOutcome>();
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn locator(id: &str, pattern: &str) -> SecretLocator {
        SecretLocator {
            id: id.to_string(),
            name: id.to_string(),
            pattern: Regex::new(pattern).unwrap(),
            pattern_source: pattern.to_string(),
            secret_group: SecretGroup::default(),
            description: None,
            confidence: None,
            severity: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_locator_equality_over_pattern() {
        let a = locator("a", "AKIA[0-9A-Z]{16}");
        let b = locator("b", "AKIA[0-9A-Z]{16}");
        let c = locator("a", "ghp_[0-9a-zA-Z]{36}");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_secret_group_extraction() {
        let mut loc = locator("g", r"key=(?P<value>\w+)");
        let caps = loc.pattern.captures(b"key=hunter2").unwrap();
        assert_eq!(loc.secret_of(&caps), Some(&b"key=hunter2"[..]));

        loc.secret_group = SecretGroup::Index(1);
        let caps = loc.pattern.captures(b"key=hunter2").unwrap();
        assert_eq!(loc.secret_of(&caps), Some(&b"hunter2"[..]));

        loc.secret_group = SecretGroup::Name("value".to_string());
        let caps = loc.pattern.captures(b"key=hunter2").unwrap();
        assert_eq!(loc.secret_of(&caps), Some(&b"hunter2"[..]));
    }

    #[test]
    fn test_result_equality_over_secret_bytes() {
        let loc = Arc::new(locator("a", "x"));
        let r1 = SecretResult {
            secret: b"token".to_vec(),
            file_path: PathBuf::from("a.java"),
            line_number: 1,
            locator: Arc::clone(&loc),
        };
        let r2 = SecretResult {
            secret: b"token".to_vec(),
            file_path: PathBuf::from("b.java"),
            line_number: 9,
            locator: loc,
        };
        assert_eq!(r1, r2);
    }

    #[test]
    fn test_secret_string_escapes_invalid_utf8() {
        let loc = Arc::new(locator("a", "x"));
        let r = SecretResult {
            secret: vec![0xff, b'o', b'k'],
            file_path: PathBuf::from("a"),
            line_number: 1,
            locator: loc,
        };
        assert_eq!(r.secret_string(), "\\xffok");
    }

    #[test]
    fn test_secret_group_deserialize_untagged() {
        let g: SecretGroup = serde_json::from_str("2").unwrap();
        assert_eq!(g, SecretGroup::Index(2));
        let g: SecretGroup = serde_json::from_str("\"value\"").unwrap();
        assert_eq!(g, SecretGroup::Name("value".to_string()));
    }
}

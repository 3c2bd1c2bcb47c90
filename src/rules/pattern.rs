//! Inline-flag extraction and byte-pattern compilation.
//!
//! Rule corpora are written against engines that accept single-letter
//! inline flag groups anywhere in the pattern. Before compiling we strip
//! those tokens and translate them to engine-level flag bits; letters with
//! no equivalent here (`l`, `t`) are accepted and ignored with a note.

use crate::error::RuleError;
use crate::types::SecretGroup;
use regex::bytes::{Regex, RegexBuilder};

/// Flag letters recognized in `(?c)` / `(?-c)` tokens.
const FLAG_LETTERS: &[char] = &['i', 'm', 's', 'a', 'l', 'u', 'x', 't'];

#[derive(Debug, Default)]
struct Flags {
    case_insensitive: bool,
    multi_line: bool,
    dot_matches_new_line: bool,
    ignore_whitespace: bool,
    ascii: bool,
}

impl Flags {
    fn set(&mut self, letter: char) {
        match letter {
            'i' => self.case_insensitive = true,
            'm' => self.multi_line = true,
            's' => self.dot_matches_new_line = true,
            'x' => self.ignore_whitespace = true,
            // ASCII mode: make \b, \w, \d byte-oriented.
            'a' => self.ascii = true,
            // 'u' (unicode) is the engine default.
            'u' => {}
            'l' | 't' => {
                tracing::debug!("inline flag '(?{letter})' has no equivalent here; ignored");
            }
            _ => {}
        }
    }
}

/// Compiles a raw pattern string into a byte-oriented regex.
///
/// Either the positive or the negated form of a flag token selects the
/// flag, matching the behavior of the engine the rule corpora target;
/// both forms are stripped from the source before compilation.
pub fn compile_pattern(source: &str) -> Result<Regex, RuleError> {
    let mut cleaned = source.to_string();
    let mut flags = Flags::default();

    for &letter in FLAG_LETTERS {
        let token = format!("(?{letter})");
        let negated = format!("(?-{letter})");
        if cleaned.contains(&token) || cleaned.contains(&negated) {
            flags.set(letter);
            cleaned = cleaned.replace(&token, "").replace(&negated, "");
        }
    }

    RegexBuilder::new(&cleaned)
        .case_insensitive(flags.case_insensitive)
        .multi_line(flags.multi_line)
        .dot_matches_new_line(flags.dot_matches_new_line)
        .ignore_whitespace(flags.ignore_whitespace)
        .unicode(!flags.ascii)
        .build()
        .map_err(|e| RuleError::Pattern {
            pattern: source.to_string(),
            source: Box::new(e),
        })
}

/// Checks that `group` names a capture group that exists in `pattern`.
///
/// Invalid groups fail at rule-load time rather than mid-scan.
#[must_use]
pub fn group_exists(pattern: &Regex, group: &SecretGroup) -> bool {
    match group {
        SecretGroup::Index(i) => *i < pattern.captures_len(),
        SecretGroup::Name(n) => pattern.capture_names().flatten().any(|name| name == n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_flag_extracted() {
        let re = compile_pattern("(?i)api_key").unwrap();
        assert!(re.is_match(b"API_KEY"));
        assert!(re.is_match(b"api_key"));
        assert!(!re.as_str().contains("(?i)"));
    }

    #[test]
    fn test_flag_token_stripped_anywhere() {
        let re = compile_pattern(r"token(?i)[a-z]{3}").unwrap();
        assert!(re.is_match(b"tokenABC"));
    }

    #[test]
    fn test_negated_form_selects_flag() {
        let re = compile_pattern("(?-i)secret").unwrap();
        assert!(re.is_match(b"SECRET"));
    }

    #[test]
    fn test_unsupported_letters_accepted() {
        // 'l' and 't' have no engine equivalent; the pattern still compiles.
        let re = compile_pattern("(?t)value=(?l)[0-9]+").unwrap();
        assert!(re.is_match(b"value=42"));
    }

    #[test]
    fn test_ascii_flag_disables_unicode_classes() {
        let re = compile_pattern(r"(?a)\bAKIA[0-9A-Z]{4}\b").unwrap();
        assert!(re.is_match(b"x AKIA1234 y"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let err = compile_pattern("([unclosed").unwrap_err();
        assert!(matches!(err, RuleError::Pattern { .. }));
    }

    #[test]
    fn test_group_validation() {
        let re = compile_pattern(r"key=(?P<v>\w+)").unwrap();
        assert!(group_exists(&re, &SecretGroup::Index(0)));
        assert!(group_exists(&re, &SecretGroup::Index(1)));
        assert!(!group_exists(&re, &SecretGroup::Index(2)));
        assert!(group_exists(&re, &SecretGroup::Name("v".to_string())));
        assert!(!group_exists(&re, &SecretGroup::Name("w".to_string())));
    }
}

//! ## larm-core::pattern
//! **Dot-hierarchical glob patterns**
//!
//! Alert identifiers are dotted paths such as `task.failure.app1.backup`.
//! Subscriptions, settings and gridboards select them with globs:
//!
//! | Glob token | Regex            | Meaning                                  |
//! |------------|------------------|------------------------------------------|
//! | `*`        | `([^.]+)`        | one or more characters, no `.` separator |
//! | `**`       | `(.*)`           | any characters, separators included      |
//! | other      | escaped literal  |                                          |
//!
//! The result is anchored at both ends. Every wildcard is a positional capture
//! group so gridboards can extract dimension values from it. A pattern that
//! starts with `^` is taken as a raw regular expression instead, which allows
//! named capture groups.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("Empty pattern")]
    Empty,

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

/// Compilation switches for [`PatternMatcher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternOptions {
    pub case_insensitive: bool,
}

/// A compiled glob (or raw regex) pattern.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    regex: Regex,
}

impl PatternMatcher {
    /// Compiles `pattern` with case-sensitive matching.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        Self::compile_with(pattern, PatternOptions::default())
    }

    pub fn compile_with(pattern: &str, options: PatternOptions) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        let source = if pattern.starts_with('^') {
            pattern.to_owned()
        } else {
            glob_to_regex(pattern)
        };
        let regex = RegexBuilder::new(&source)
            .case_insensitive(options.case_insensitive)
            .build()
            .map_err(|e| PatternError::InvalidRegex {
                pattern: pattern.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    /// The pattern as written in configuration.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The compiled regular expression source.
    pub fn regex_source(&self) -> &str {
        self.regex.as_str()
    }

    #[inline]
    pub fn is_match(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// Returns the capture groups of `input`, or `None` when it does not match.
    pub fn captures<'a>(&'a self, input: &'a str) -> Option<PatternCaptures<'a>> {
        self.regex.captures(input).map(|captures| PatternCaptures { captures })
    }
}

impl PartialEq for PatternMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.regex.as_str() == other.regex.as_str()
    }
}

/// Capture groups of a successful match.
pub struct PatternCaptures<'a> {
    captures: regex::Captures<'a>,
}

impl PatternCaptures<'_> {
    /// Positional capture, `1` being the first wildcard.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.captures.get(index).map(|m| m.as_str())
    }

    pub fn name(&self, name: &str) -> Option<&str> {
        self.captures.name(name).map(|m| m.as_str())
    }
}

/// Translates a dotted glob into an anchored regex source.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                out.push_str("(.*)");
            } else {
                out.push_str("([^.]+)");
            }
        } else {
            let mut buf = [0u8; 4];
            out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_star_stays_within_one_segment() {
        let matcher = PatternMatcher::compile("a.*.c").unwrap();
        assert!(matcher.is_match("a.b.c"));
        assert!(!matcher.is_match("a.b.b.c"));
        assert!(!matcher.is_match("a..c"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let matcher = PatternMatcher::compile("a.**").unwrap();
        assert!(matcher.is_match("a.b.c.d"));
        assert!(!matcher.is_match("b.c"));
    }

    #[test]
    fn metacharacters_are_literal() {
        let matcher = PatternMatcher::compile("job(1)+.[x]").unwrap();
        assert!(matcher.is_match("job(1)+.[x]"));
        assert!(!matcher.is_match("job11.x"));
    }

    #[test]
    fn matching_is_case_sensitive_by_default() {
        let matcher = PatternMatcher::compile("task.*").unwrap();
        assert!(!matcher.is_match("TASK.foo"));

        let options = PatternOptions {
            case_insensitive: true,
        };
        let matcher = PatternMatcher::compile_with("task.*", options).unwrap();
        assert!(matcher.is_match("TASK.foo"));
    }

    #[test]
    fn wildcards_are_positional_captures() {
        let matcher = PatternMatcher::compile("task.*.on.**").unwrap();
        let captures = matcher.captures("task.backup.on.host.example").unwrap();
        assert_eq!(captures.get(1), Some("backup"));
        assert_eq!(captures.get(2), Some("host.example"));
    }

    #[test]
    fn raw_regex_keeps_named_groups() {
        let matcher = PatternMatcher::compile(r"^task\.failure\.(?P<taskid>.+)$").unwrap();
        let captures = matcher.captures("task.failure.foo").unwrap();
        assert_eq!(captures.name("taskid"), Some("foo"));
    }

    #[test]
    fn rejects_empty_and_broken_patterns() {
        assert_eq!(PatternMatcher::compile("").unwrap_err(), PatternError::Empty);
        assert!(matches!(
            PatternMatcher::compile("^(unclosed"),
            Err(PatternError::InvalidRegex { .. })
        ));
    }

    proptest! {
        #[test]
        fn literal_globs_match_only_themselves(id in "[a-z]{1,8}(\\.[a-z]{1,8}){0,3}") {
            let matcher = PatternMatcher::compile(&id).unwrap();
            prop_assert!(matcher.is_match(&id));
            let longer = format!("{id}.x");
            prop_assert!(!matcher.is_match(&longer));
        }

        #[test]
        fn double_star_suffix_matches_any_descendant(
            prefix in "[a-z]{1,8}",
            rest in "[a-z]{1,8}(\\.[a-z]{1,8}){0,4}",
        ) {
            let matcher = PatternMatcher::compile(&format!("{prefix}.**")).unwrap();
            let id = format!("{prefix}.{rest}");
            prop_assert!(matcher.is_match(&id));
        }
    }
}

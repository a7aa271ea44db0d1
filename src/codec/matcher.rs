//! Term matching engines.
//!
//! The codec only needs matched spans and the term behind each; how they
//! are found is behind [`TermMatcher`].

use crate::{Error, Result};
use regex::{Regex, RegexBuilder};
use std::ops::Range;

/// Upper bound for the compiled alternation (bytes).
const REGEX_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// A matched span and the position of the term that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermMatch {
    /// Byte range of the match in the searched text.
    pub span: Range<usize>,
    /// Index of the matching term in the order the matcher was built with.
    pub term: usize,
}

/// Finds whole-word, case-insensitive occurrences of a fixed term set.
pub trait TermMatcher: Send + Sync + std::fmt::Debug {
    /// Returns non-overlapping matches, left to right.
    fn find(&self, text: &str) -> Vec<TermMatch>;
}

/// Regex alternation matcher.
///
/// Compiles `\b(?:(t1)|(t2)|...)\b` with every term escaped and wrapped in
/// its own group, so each match reports which term it came from.
/// Alternation is leftmost-first: at a given position the earlier term wins.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    pattern: Regex,
    terms: usize,
}

impl RegexMatcher {
    /// Builds a matcher for `terms` in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `terms` is empty or the pattern
    /// does not compile.
    pub fn new<'a, I>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let groups: Vec<String> = terms
            .into_iter()
            .map(|term| format!("({})", regex::escape(term)))
            .collect();

        if groups.is_empty() {
            return Err(Error::Configuration(
                "cannot build a matcher without terms".to_string(),
            ));
        }

        let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", groups.join("|")))
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| Error::Configuration(format!("term pattern: {e}")))?;

        Ok(Self {
            pattern,
            terms: groups.len(),
        })
    }
}

impl TermMatcher for RegexMatcher {
    fn find(&self, text: &str) -> Vec<TermMatch> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let term = (1..=self.terms).find(|&i| caps.get(i).is_some())? - 1;
                Some(TermMatch {
                    span: whole.range(),
                    term,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched<'t>(matcher: &RegexMatcher, text: &'t str) -> Vec<&'t str> {
        matcher
            .find(text)
            .into_iter()
            .map(|m| &text[m.span])
            .collect()
    }

    #[test]
    fn test_whole_word_only() {
        let matcher = RegexMatcher::new(["cat"]).unwrap();
        assert!(matched(&matcher, "category concat cats").is_empty());
        assert_eq!(matched(&matcher, "a cat, the cat."), vec!["cat", "cat"]);
    }

    #[test]
    fn test_case_insensitive() {
        let matcher = RegexMatcher::new(["Hogwarts"]).unwrap();
        assert_eq!(
            matched(&matcher, "HOGWARTS and hogwarts"),
            vec!["HOGWARTS", "hogwarts"]
        );
    }

    #[test]
    fn test_metacharacters_are_literal() {
        let matcher = RegexMatcher::new(["a.b", "x+y"]).unwrap();
        assert!(matched(&matcher, "axb xxy").is_empty());
        assert_eq!(matched(&matcher, "a.b and x+y"), vec!["a.b", "x+y"]);
    }

    #[test]
    fn test_earlier_term_wins_at_same_position() {
        let matcher = RegexMatcher::new(["Ministry", "Ministry of Magic"]).unwrap();
        assert_eq!(matched(&matcher, "the Ministry of Magic"), vec!["Ministry"]);

        let matcher = RegexMatcher::new(["Ministry of Magic", "Ministry"]).unwrap();
        assert_eq!(
            matched(&matcher, "the Ministry of Magic"),
            vec!["Ministry of Magic"]
        );
    }

    #[test]
    fn test_reports_matching_term() {
        let matcher = RegexMatcher::new(["alpha", "beta gamma", "delta"]).unwrap();
        let terms: Vec<usize> = matcher
            .find("DELTA then Beta Gamma then alpha")
            .into_iter()
            .map(|m| m.term)
            .collect();
        assert_eq!(terms, vec![2, 1, 0]);
    }

    #[test]
    fn test_empty_terms_rejected() {
        let err = RegexMatcher::new(std::iter::empty()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}

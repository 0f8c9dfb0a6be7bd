// src/enhancer/matcher.rs - Compiled matchers for filtered words and emote codes

use log::{debug, warn};
use regex::{NoExpand, Regex, RegexBuilder};
use std::borrow::Cow;

use crate::types::EnhancerError;

/// How a literal (non-regex) input becomes a pattern.
///
/// Profanity filters and emote codes deliberately use different policies:
/// a filtered word must stand alone, an emote code fires wherever it appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Case-insensitive whole-word match. Used for filtered words.
    WordBoundary,
    /// Raw substring match. Used for emote codes.
    Substring { case_sensitive: bool },
}

/// A literal or `/pattern/flags` matcher.
///
/// A pattern built with [`CompiledPattern::compile_or_never`] from a bad spec
/// holds no regex and simply never matches.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Option<Regex>,
}

impl CompiledPattern {
    /// Compile a spec, reporting malformed input.
    pub fn compile(spec: &str, policy: MatchPolicy) -> Result<Self, EnhancerError> {
        if spec.is_empty() {
            return Err(malformed(spec, "empty pattern"));
        }

        let regex = match split_regex_spec(spec) {
            Some((pattern, flags)) => build_regex_spec(spec, pattern, flags)?,
            None => build_literal(spec, policy)?,
        };

        // A pattern matching the empty string would mask between every character.
        if regex.is_match("") {
            return Err(malformed(spec, "pattern matches empty input"));
        }

        Ok(Self {
            source: spec.to_string(),
            regex: Some(regex),
        })
    }

    /// Compile `text` literally, even when it has the `/pattern/flags` shape.
    pub fn literal(text: &str, policy: MatchPolicy) -> Result<Self, EnhancerError> {
        if text.is_empty() {
            return Err(malformed(text, "empty pattern"));
        }
        let regex = build_literal(text, policy)?;
        if regex.is_match("") {
            return Err(malformed(text, "pattern matches empty input"));
        }
        Ok(Self {
            source: text.to_string(),
            regex: Some(regex),
        })
    }

    /// Compile a spec; malformed input yields a pattern that never matches.
    pub fn compile_or_never(spec: &str, policy: MatchPolicy) -> Self {
        match Self::compile(spec, policy) {
            Ok(pattern) => pattern,
            Err(e) => {
                debug!("{}", e);
                Self {
                    source: spec.to_string(),
                    regex: None,
                }
            }
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// False for patterns produced from malformed specs.
    pub fn can_match(&self) -> bool {
        self.regex.is_some()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.as_ref().map_or(false, |re| re.is_match(text))
    }

    /// Byte ranges of every non-overlapping match, left to right.
    pub fn match_ranges(&self, text: &str) -> Vec<(usize, usize)> {
        match &self.regex {
            Some(re) => re.find_iter(text).map(|m| (m.start(), m.end())).collect(),
            None => Vec::new(),
        }
    }

    /// Replace every match with `replacement`, taken literally.
    pub fn replace_all<'t>(&self, text: &'t str, replacement: &str) -> Cow<'t, str> {
        match &self.regex {
            Some(re) => re.replace_all(text, NoExpand(replacement)),
            None => Cow::Borrowed(text),
        }
    }
}

/// True when `spec` has the `/pattern/flags` shape.
pub fn is_regex_spec(spec: &str) -> bool {
    split_regex_spec(spec).is_some()
}

/// Escape regex metacharacters so user-entered words match literally.
pub fn escape_literal(text: &str) -> String {
    regex::escape(text)
}

fn split_regex_spec(spec: &str) -> Option<(&str, &str)> {
    if !spec.starts_with('/') {
        return None;
    }
    let last = spec.rfind('/')?;
    if last == 0 {
        return None;
    }
    Some((&spec[1..last], &spec[last + 1..]))
}

fn build_regex_spec(spec: &str, pattern: &str, flags: &str) -> Result<Regex, EnhancerError> {
    if pattern.is_empty() {
        return Err(malformed(spec, "empty pattern"));
    }

    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            // Global, unicode and sticky have no meaning for replace-all matching.
            'g' | 'u' | 'y' => {}
            other => return Err(malformed(spec, &format!("unknown regex flag '{}'", other))),
        }
    }

    builder
        .build()
        .map_err(|e| malformed(spec, &e.to_string()))
}

fn build_literal(spec: &str, policy: MatchPolicy) -> Result<Regex, EnhancerError> {
    let escaped = escape_literal(spec);
    let (pattern, case_insensitive) = match policy {
        MatchPolicy::WordBoundary => (word_bounded(spec, &escaped), true),
        MatchPolicy::Substring { case_sensitive } => (escaped, !case_sensitive),
    };

    RegexBuilder::new(&pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| malformed(spec, &e.to_string()))
}

/// Anchor an escaped word so it only matches as a standalone token.
///
/// `\b` is only satisfiable next to a word character, so an edge that is
/// punctuation (`c++`, `:)`) gets `\B` instead: its neighbour must be
/// punctuation, whitespace or the end of the text.
fn word_bounded(word: &str, escaped: &str) -> String {
    let edge = |c: Option<char>| match c {
        Some(c) if c.is_alphanumeric() || c == '_' => r"\b",
        _ => r"\B",
    };
    format!("{}{}{}", edge(word.chars().next()), escaped, edge(word.chars().last()))
}

fn malformed(spec: &str, reason: &str) -> EnhancerError {
    EnhancerError::MalformedFilterSpec {
        spec: spec.to_string(),
        reason: reason.to_string(),
    }
}

/// Ordered word-filter matchers sharing one mask token.
#[derive(Debug, Clone)]
pub struct WordFilter {
    patterns: Vec<CompiledPattern>,
    mask: String,
}

impl WordFilter {
    /// Compile filtered words in order. Malformed entries are dropped.
    pub fn compile<S: AsRef<str>>(words: &[S], mask: &str) -> Self {
        let mut patterns = Vec::with_capacity(words.len());

        for word in words {
            let word = word.as_ref();
            if word.is_empty() {
                continue;
            }
            match CompiledPattern::compile(word, MatchPolicy::WordBoundary) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => warn!("Dropping filter entry: {}", e),
            }
        }

        Self {
            patterns,
            mask: mask.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn mask(&self) -> &str {
        &self.mask
    }

    pub fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    /// True if any filter fires on `text`.
    pub fn is_hit(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }

    /// Replace every occurrence of every filtered word with the mask token.
    pub fn redact<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let mut current = Cow::Borrowed(text);
        for pattern in &self.patterns {
            let replaced = match pattern.replace_all(&current, &self.mask) {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            if let Some(replaced) = replaced {
                current = Cow::Owned(replaced);
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundary_matching() {
        let filter = WordFilter::compile(&["spam"], "***");

        assert_eq!(filter.redact("no spam here"), "no *** here");
        assert_eq!(filter.redact("SPAM Spam spam"), "*** *** ***");
        assert_eq!(filter.redact("spammer antispam"), "spammer antispam");
        assert_eq!(filter.redact("spam, spam."), "***, ***.");
    }

    #[test]
    fn test_punctuation_edged_words_match_as_tokens() {
        let filter = WordFilter::compile(&["c++", ":)"], "***");

        assert_eq!(filter.redact("I like c++."), "I like ***.");
        assert_eq!(filter.redact("hi :) there"), "hi *** there");
        assert_eq!(filter.redact(":)"), "***");
        assert_eq!(filter.redact("c++x a:)"), "c++x a:)");
    }

    #[test]
    fn test_literal_metacharacters_are_escaped() {
        let filter = WordFilter::compile(&["a.b"], "***");
        assert_eq!(filter.redact("a.b axb"), "*** axb");

        let pattern = CompiledPattern::compile("(x)", MatchPolicy::Substring { case_sensitive: true }).unwrap();
        assert!(pattern.is_match("a(x)b"));
        assert!(!pattern.is_match("axb"));
    }

    #[test]
    fn test_regex_spec_uses_its_own_flags() {
        let insensitive = CompiledPattern::compile("/bad+/i", MatchPolicy::WordBoundary).unwrap();
        assert!(insensitive.is_match("BADDD"));

        let sensitive = CompiledPattern::compile("/bad+/", MatchPolicy::WordBoundary).unwrap();
        assert!(sensitive.is_match("baddd"));
        assert!(!sensitive.is_match("BADDD"));

        let global = CompiledPattern::compile("/x{2}/gi", MatchPolicy::WordBoundary).unwrap();
        assert_eq!(global.replace_all("XX xx", "-"), "- -");
    }

    #[test]
    fn test_malformed_specs_are_dropped() {
        let filter = WordFilter::compile(&["/(unclosed/", "/x/q", "//", "/a*/", "ok"], "***");
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.patterns()[0].source(), "ok");

        let never = CompiledPattern::compile_or_never("/[/", MatchPolicy::WordBoundary);
        assert!(!never.can_match());
        assert!(!never.is_match("["));
        assert_eq!(never.replace_all("[", "***"), "[");
    }

    #[test]
    fn test_slash_without_closing_is_literal() {
        assert!(!is_regex_spec("/"));
        assert!(!is_regex_spec("a/b/"));
        assert!(is_regex_spec("/a/"));

        let pattern = CompiledPattern::compile("/", MatchPolicy::Substring { case_sensitive: true }).unwrap();
        assert!(pattern.is_match("a/b"));
    }

    #[test]
    fn test_substring_policy_case_handling() {
        let sensitive = CompiledPattern::compile("LUL", MatchPolicy::Substring { case_sensitive: true }).unwrap();
        assert_eq!(sensitive.match_ranges("LUL lul LULW"), vec![(0, 3), (8, 11)]);

        let insensitive = CompiledPattern::compile("LUL", MatchPolicy::Substring { case_sensitive: false }).unwrap();
        assert_eq!(insensitive.match_ranges("LUL lul").len(), 2);
    }

    #[test]
    fn test_literal_ignores_regex_shape() {
        let pattern = CompiledPattern::literal("/D/", MatchPolicy::Substring { case_sensitive: true }).unwrap();
        assert!(pattern.is_match("a /D/ b"));
        assert!(!pattern.is_match("D"));
        assert!(CompiledPattern::literal("", MatchPolicy::WordBoundary).is_err());
    }

    #[test]
    fn test_filters_apply_in_order() {
        let filter = WordFilter::compile(&["bad", "/\\*\\*\\*/"], "***");
        // The second filter matches the mask itself and is a no-op replacement.
        assert_eq!(filter.redact("bad"), "***");
        assert!(filter.is_hit("so bad"));
        assert!(!filter.is_hit("good"));
    }
}

//! Turns action/definition snippets into line matchers and display strings.
//!
//! A snippet is a template mixing literal words with typed placeholders in
//! either the `%s_timer` form or the `${1:_item_}` tab-stop form. Matching is
//! whitespace-insensitive between tokens and anchored to the whole line.

use lazy_static::lazy_static;
use regex::Regex;

/// What a placeholder may match: an identifier-shaped token. Symbol names,
/// task names, quest names and bare numbers all fit this class.
const WORD_PATTERN: &str = "[a-zA-Z0-9._-]+";

lazy_static! {
    static ref TAB_STOP: Regex =
        Regex::new(r"\$\{\d+:([^}]+)\}").expect("tab stop pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnippetToken {
    Literal(String),
    Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// A `%`-prefixed typed placeholder, e.g. `%s_timer` or `%n`.
    Typed(String),
    /// A `${n:label}` tab stop; the label may contain spaces.
    TabStop(String),
}

/// Splits a snippet into literal and placeholder tokens.
///
/// `${...}` groups are consumed atomically so labels with spaces stay intact;
/// everything else splits on whitespace.
pub fn tokenize(snippet: &str) -> Vec<SnippetToken> {
    let mut tokens = Vec::new();
    let mut rest = snippet.trim_start();

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("${") {
            match after.find('}') {
                Some(close) => {
                    let inner = &after[..close];
                    let label = inner.split_once(':').map(|(_, label)| label).unwrap_or(inner);
                    tokens.push(SnippetToken::Placeholder(Placeholder::TabStop(
                        label.to_string(),
                    )));
                    rest = after[close + 1..].trim_start();
                    continue;
                }
                // Unterminated group, treat the rest as a literal word.
                None => {}
            }
        }

        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        let word = &rest[..end];
        if word.len() > 1 && word.starts_with('%') {
            tokens.push(SnippetToken::Placeholder(Placeholder::Typed(
                word.to_string(),
            )));
        } else {
            tokens.push(SnippetToken::Literal(word.to_string()));
        }
        rest = rest[end..].trim_start();
    }

    tokens
}

/// Derives an anchored matcher from a snippet: literal tokens are escaped,
/// placeholders become permissive word patterns, tokens are joined
/// whitespace-insensitively.
pub fn compile(snippet: &str) -> Regex {
    let parts: Vec<String> = tokenize(snippet)
        .into_iter()
        .map(|token| match token {
            SnippetToken::Literal(word) => regex::escape(&word),
            SnippetToken::Placeholder(_) => WORD_PATTERN.to_string(),
        })
        .collect();
    let pattern = format!(r"^\s*{}\s*$", parts.join(r"\s+"));
    Regex::new(&pattern).expect("derived snippet pattern is valid")
}

/// Wraps an explicit pattern override as a full-line anchored matcher,
/// tolerating leading and trailing whitespace.
pub fn compile_override(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"^\s*{pattern}\s*$"))
}

/// Converts a signature template to its display form: `${n:label}` collapses
/// to `label`, all other tokens are untouched. Display only, never matched.
pub fn pretty_print(signature: &str) -> String {
    TAB_STOP.replace_all(signature, "$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_typed_and_tab_stop_placeholders() {
        let tokens = tokenize("start timer %s_timer");
        assert_eq!(
            tokens,
            vec![
                SnippetToken::Literal("start".into()),
                SnippetToken::Literal("timer".into()),
                SnippetToken::Placeholder(Placeholder::Typed("%s_timer".into())),
            ]
        );

        let tokens = tokenize("Item ${1:_item_} gold range ${2:min} to ${3:max}");
        let placeholders = tokens
            .iter()
            .filter(|t| matches!(t, SnippetToken::Placeholder(_)))
            .count();
        assert_eq!(placeholders, 3);
    }

    #[test]
    fn tab_stop_labels_may_contain_spaces() {
        let tokens = tokenize("say ${1:message id}");
        assert_eq!(
            tokens[1],
            SnippetToken::Placeholder(Placeholder::TabStop("message id".into()))
        );
    }

    #[test]
    fn derived_matcher_accepts_identifier_shaped_tokens() {
        let matcher = compile("start timer %s_timer");
        assert!(matcher.is_match("start timer _timer_"));
        assert!(matcher.is_match("  start   timer _quest.timer_  "));
        assert!(!matcher.is_match("start timer"));
        assert!(!matcher.is_match("start timer _timer_ extra"));
    }

    #[test]
    fn derived_matcher_escapes_literal_metacharacters() {
        let matcher = compile("clock %s (flag)");
        assert!(matcher.is_match("clock _delay_ (flag)"));
        assert!(!matcher.is_match("clock _delay_ flag"));
    }

    #[test]
    fn override_is_anchored_and_whitespace_tolerant() {
        let matcher = compile_override(r"Person\s+[a-zA-Z0-9._]+").expect("valid override");
        assert!(matcher.is_match("  Person _vendor_  "));
        assert!(!matcher.is_match("Person _vendor_ trailing"));
    }

    #[test]
    fn pretty_print_preserves_token_count() {
        let signature = "Item ${1:_item_} artifact ${2:name}";
        let pretty = pretty_print(signature);
        assert_eq!(pretty, "Item _item_ artifact name");
        assert_eq!(
            signature.split_whitespace().count(),
            pretty.split_whitespace().count()
        );
    }

    #[test]
    fn rederived_matchers_are_equivalent() {
        let samples = [
            "start timer _timer_",
            "start timer _a.b_",
            "start timer",
            "stop timer _timer_",
            "start timer _x_ _y_",
        ];
        let first = compile("start timer %s_timer");
        let second = compile("start timer %s_timer");
        for sample in samples {
            assert_eq!(first.is_match(sample), second.is_match(sample), "{sample}");
        }
    }
}

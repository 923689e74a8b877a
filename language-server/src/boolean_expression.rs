//! Recognizer for the boolean-expression form of a task condition.
//!
//! Task lines that start with `when` combine task and variable states with
//! `and`, `or` and `not` instead of invoking a module condition:
//!
//! ```text
//! when _slain_ and not _timeout_
//! ```

use lazy_static::lazy_static;
use regex::Regex;

use crate::modules::{Action, ActionKind, ActionResult};

lazy_static! {
    static ref EXPRESSION: Regex = Regex::new(
        r"^\s*when(\s+not)?\s+[a-zA-Z0-9._]+(\s+(and|or)(\s+not)?\s+[a-zA-Z0-9._]+)*\s*$"
    )
    .expect("boolean expression pattern is valid");
}

/// The leading keyword that introduces a boolean expression.
pub const KEYWORD: &str = "when";

pub fn matches(prefix: &str, text: &str) -> bool {
    prefix.eq_ignore_ascii_case(KEYWORD) && EXPRESSION.is_match(text)
}

/// Builds the resolution result for a matched expression. The invoking text
/// itself stands in as the only overload.
pub fn make_result(text: &str) -> ActionResult {
    ActionResult {
        module_name: String::new(),
        kind: ActionKind::Condition,
        action: Action {
            summary: "A boolean expression over task and variable states.".to_string(),
            overloads: vec![text.trim().to_string()],
        },
        overload: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_single_operand() {
        assert!(matches("when", "when _slain_"));
        assert!(matches("when", "  when not _slain_  "));
    }

    #[test]
    fn recognizes_chained_operands() {
        assert!(matches("when", "when _slain_ and not _timeout_ or _paid_"));
    }

    #[test]
    fn rejects_other_prefixes_and_malformed_chains() {
        assert!(!matches("start", "start task _slain_"));
        assert!(!matches("when", "when"));
        assert!(!matches("when", "when _a_ and"));
        assert!(!matches("when", "when _a_ _b_"));
    }

    #[test]
    fn result_is_a_condition_with_the_invoking_text() {
        let result = make_result("  when _slain_ and _paid_ ");
        assert_eq!(result.kind, ActionKind::Condition);
        assert_eq!(result.overload, 0);
        assert_eq!(result.action.overloads, vec!["when _slain_ and _paid_"]);
    }
}

//! Repeat guard for the tool-calling loop
//!
//! A model that keeps calling the same tool with the same arguments and
//! getting the same answer is hallucinating progress. The guard watches for
//! that pattern and produces a hint to feed back into the conversation.

/// Detects consecutive identical (tool, arguments, result) calls.
pub struct RepeatGuard {
    /// Last observed (tool_name, arguments, result_snippet)
    last: Option<(String, String, String)>,
    /// Consecutive repeats of `last` seen so far
    repeats: usize,
    /// Repeat count that triggers a hint
    threshold: usize,
}

impl RepeatGuard {
    /// Create a guard that fires after `threshold` identical calls in a row
    pub fn new(threshold: usize) -> Self {
        Self {
            last: None,
            repeats: 0,
            threshold,
        }
    }

    /// Record a tool call and its result. Returns `Some(hint)` when the
    /// model appears stuck and should be redirected.
    pub fn record(&mut self, tool_name: &str, arguments: &str, result: &str) -> Option<String> {
        let snippet = Self::snippet(result);
        let current = (tool_name.to_string(), arguments.to_string(), snippet);

        if self.last.as_ref() == Some(&current) {
            self.repeats += 1;
        } else {
            self.last = Some(current);
            self.repeats = 1;
        }

        if self.repeats >= self.threshold {
            self.last = None;
            self.repeats = 0;
            return Some(format!(
                "The tool '{}' has returned the same result {} times in a row. \
                 Do not call it again with the same arguments; use the information \
                 you already have, or finish your answer.",
                tool_name, self.threshold
            ));
        }

        None
    }

    fn snippet(s: &str) -> String {
        s.chars().take(200).collect()
    }
}

impl Default for RepeatGuard {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_trigger_on_varying_calls() {
        let mut guard = RepeatGuard::default();
        assert!(guard.record("describe_table", r#"{"name":"orders"}"#, "cols: a").is_none());
        assert!(guard.record("describe_table", r#"{"name":"items"}"#, "cols: b").is_none());
        assert!(guard.record("describe_table", r#"{"name":"users"}"#, "cols: c").is_none());
    }

    #[test]
    fn triggers_on_identical_repeats() {
        let mut guard = RepeatGuard::new(3);
        let args = r#"{"query":"revenue"}"#;
        assert!(guard.record("search_knowledge_base", args, "no results").is_none());
        assert!(guard.record("search_knowledge_base", args, "no results").is_none());
        assert!(guard.record("search_knowledge_base", args, "no results").is_some());
    }

    #[test]
    fn resets_after_trigger() {
        let mut guard = RepeatGuard::new(2);
        assert!(guard.record("t", "{}", "same").is_none());
        assert!(guard.record("t", "{}", "same").is_some());
        assert!(guard.record("t", "{}", "same").is_none());
    }

    #[test]
    fn different_args_break_the_streak() {
        let mut guard = RepeatGuard::new(2);
        assert!(guard.record("t", r#"{"a":1}"#, "same").is_none());
        assert!(guard.record("t", r#"{"a":2}"#, "same").is_none());
        assert!(guard.record("t", r#"{"a":2}"#, "same").is_some());
    }
}

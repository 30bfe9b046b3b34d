//! SQL safety gate
//!
//! The generated statement must be a single read-only query. The gate strips
//! comments and string literals, then inspects keywords: the statement must
//! open with `SELECT` (or `WITH` leading to a top-level `SELECT`), no write
//! or DDL keyword may appear anywhere, and only one statement is allowed.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Keywords that disqualify a statement outright
const BANNED_KEYWORDS: [&str; 9] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "CREATE",
];

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("word regex"))
}

/// Reject `sql` unless it is a single read-only statement
pub fn check_read_only(sql: &str) -> Result<()> {
    let stripped = strip_literals_and_comments(sql);
    let trimmed = stripped.trim();

    if trimmed.is_empty() {
        return Err(Error::UnsafeStatement("empty statement".to_string()));
    }

    // A semicolon is only allowed as a trailing terminator.
    if let Some(pos) = trimmed.find(';') {
        if trimmed[pos + 1..].trim().is_empty() {
            // trailing terminator, fine
        } else {
            return Err(Error::UnsafeStatement(
                "multiple statements are not allowed".to_string(),
            ));
        }
    }

    let words: Vec<String> = word_regex()
        .find_iter(trimmed)
        .map(|m| m.as_str().to_uppercase())
        .collect();

    let Some(first) = words.first() else {
        return Err(Error::UnsafeStatement("no SQL keyword found".to_string()));
    };

    if first != "SELECT" && first != "WITH" {
        return Err(Error::UnsafeStatement(format!(
            "statement must start with SELECT or WITH, found {}",
            first
        )));
    }

    for word in &words {
        if BANNED_KEYWORDS.contains(&word.as_str()) {
            return Err(Error::UnsafeStatement(format!(
                "{} is not allowed in a read-only query",
                word
            )));
        }
    }

    if first == "WITH" && !words.iter().any(|w| w == "SELECT") {
        return Err(Error::UnsafeStatement(
            "WITH must terminate in a SELECT".to_string(),
        ));
    }

    Ok(())
}

/// Remove quoted literals, quoted identifiers, and comments so keyword
/// scanning cannot be fooled by text content.
fn strip_literals_and_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                // Consume until the closing quote; '' escapes inside strings.
                while let Some(inner) = chars.next() {
                    if inner == quote {
                        if chars.peek() == Some(&quote) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                out.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_select() {
        assert!(check_read_only("SELECT * FROM orders LIMIT 5").is_ok());
        assert!(check_read_only("select id from orders;").is_ok());
    }

    #[test]
    fn accepts_cte_ending_in_select() {
        let sql = "WITH totals AS (SELECT customer_id, SUM(total) t FROM orders GROUP BY 1)\n\
                   SELECT * FROM totals ORDER BY t DESC";
        assert!(check_read_only(sql).is_ok());
    }

    #[test]
    fn rejects_every_banned_keyword() {
        let statements = [
            "INSERT INTO orders VALUES (1)",
            "UPDATE orders SET total = 0",
            "DELETE FROM orders",
            "DROP TABLE orders",
            "ALTER TABLE orders ADD COLUMN x int",
            "TRUNCATE orders",
            "GRANT ALL ON orders TO public",
            "REVOKE ALL ON orders FROM public",
            "CREATE TABLE pwned (id int)",
        ];
        for sql in statements {
            assert!(
                matches!(check_read_only(sql), Err(Error::UnsafeStatement(_))),
                "should reject: {}",
                sql
            );
        }
    }

    #[test]
    fn rejects_banned_keyword_after_select() {
        assert!(check_read_only("SELECT 1; DELETE FROM orders").is_err());
        assert!(check_read_only("WITH x AS (SELECT 1) DELETE FROM orders").is_err());
    }

    #[test]
    fn rejects_multiple_statements() {
        assert!(check_read_only("SELECT 1; SELECT 2").is_err());
    }

    #[test]
    fn allows_banned_words_inside_literals() {
        assert!(check_read_only("SELECT * FROM audit WHERE action = 'DELETE'").is_ok());
        assert!(check_read_only("SELECT 'DROP TABLE users' AS warning").is_ok());
    }

    #[test]
    fn ignores_comments() {
        assert!(check_read_only("SELECT 1 -- DELETE FROM orders\n").is_ok());
        assert!(check_read_only("SELECT /* DROP */ 1").is_ok());
    }

    #[test]
    fn rejects_table_names_that_merely_contain_keywords() {
        // `updates` is a word of its own, not the UPDATE keyword.
        assert!(check_read_only("SELECT * FROM updates").is_ok());
        assert!(check_read_only("SELECT created_at FROM orders").is_ok());
    }

    #[test]
    fn rejects_empty_and_non_query_input() {
        assert!(check_read_only("").is_err());
        assert!(check_read_only("   ").is_err());
        assert!(check_read_only("EXPLAIN SELECT 1").is_err());
    }

    #[test]
    fn rejects_with_without_select() {
        assert!(check_read_only("WITH x AS (VALUES (1)) TABLE x").is_err());
    }
}

//! Query Guards
//!
//! The single enforcement point every SQL string passes through before it
//! reaches a warehouse connection. Checks are lexical, not a parse:
//! 1. reject empty input
//! 2. strip markdown code fences
//! 3. require a `SELECT` / `WITH` prefix
//! 4. reject `SELECT *`
//! 5. sweep the policy's banned patterns as whole words over the full text
//! 6. clamp or append the `LIMIT` clause
//!
//! Only step 6 changes the text. A banned word inside a string literal
//! still rejects the query.

use crate::error::Result;
use crate::security::policy::GuardrailPolicy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a query was refused. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectionReason {
    #[error("Query is empty")]
    EmptyInput,

    #[error("Only SELECT queries are allowed")]
    NotSelectStatement,

    #[error("Banned SQL pattern detected: {0}")]
    BannedPattern(String),

    #[error("SELECT * is not allowed; name the columns explicitly")]
    WildcardSelect,
}

/// SQL text that passed every guard. Only [`SqlValidator`] builds these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidatedQuery(String);

impl ValidatedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for ValidatedQuery {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct BannedRule {
    pattern: String,
    regex: Regex,
}

pub struct SqlValidator {
    policy: Arc<GuardrailPolicy>,
    banned: Vec<BannedRule>,
    fence_open: Regex,
    fence_close: Regex,
    wildcard: Regex,
    limit_clause: Regex,
}

impl SqlValidator {
    /// Compiles the policy's patterns once; the validator is then reused
    /// for every query.
    pub fn new(policy: Arc<GuardrailPolicy>) -> Result<Self> {
        let banned = policy
            .banned_patterns()
            .iter()
            .map(|pattern| -> Result<BannedRule> {
                Ok(BannedRule {
                    pattern: pattern.clone(),
                    regex: Regex::new(&whole_word_pattern(pattern))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            policy,
            banned,
            // Any language tag that ends its line (```sqlite), or an inline ```sql
            fence_open: Regex::new(r"(?i)^\s*```(?:[A-Za-z0-9_+-]+[ \t]*\r?\n|sql\b)?\s*")?,
            fence_close: Regex::new(r"\s*```\s*$")?,
            wildcard: Regex::new(r"\bSELECT\s*\*")?,
            limit_clause: Regex::new(r"(?i)\bLIMIT\s+(\d+)")?,
        })
    }

    pub fn policy(&self) -> &GuardrailPolicy {
        &self.policy
    }

    pub fn shared_policy(&self) -> Arc<GuardrailPolicy> {
        Arc::clone(&self.policy)
    }

    pub fn validate(&self, raw: &str) -> std::result::Result<ValidatedQuery, RejectionReason> {
        self.check(raw).map_err(|reason| {
            warn!("SQL rejected by guardrails: {}", reason);
            reason
        })
    }

    fn check(&self, raw: &str) -> std::result::Result<ValidatedQuery, RejectionReason> {
        if raw.trim().is_empty() {
            return Err(RejectionReason::EmptyInput);
        }

        let unfenced = self.strip_fences(raw);
        let sql = unfenced.trim();
        let normalized = sql.to_uppercase();

        if !(normalized.starts_with("SELECT") || normalized.starts_with("WITH")) {
            return Err(RejectionReason::NotSelectStatement);
        }

        if self.wildcard.is_match(&normalized) {
            return Err(RejectionReason::WildcardSelect);
        }

        if let Some(rule) = self.banned.iter().find(|rule| rule.regex.is_match(&normalized)) {
            return Err(RejectionReason::BannedPattern(rule.pattern.clone()));
        }

        Ok(ValidatedQuery(self.enforce_limit(sql)))
    }

    fn strip_fences(&self, raw: &str) -> String {
        let opened = self.fence_open.replace(raw, "");
        self.fence_close.replace(&opened, "").into_owned()
    }

    /// First `LIMIT <n>` wins; a second clause (e.g. in a subquery) is left alone.
    fn enforce_limit(&self, sql: &str) -> String {
        let max_rows = self.policy.max_rows();

        if let Some(caps) = self.limit_clause.captures(sql) {
            let clause = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            // Digits too long for u64 are over any ceiling.
            let exceeds = caps[1].parse::<u64>().map_or(true, |n| n > max_rows);
            if !exceeds {
                return sql.to_string();
            }

            debug!("Clamping {} to LIMIT {}", &caps[0], max_rows);
            return format!(
                "{}LIMIT {}{}",
                &sql[..clause.start],
                max_rows,
                &sql[clause.end..]
            );
        }

        let body = sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        debug!("Appending LIMIT {}", max_rows);
        // A trailing `--` comment would swallow a same-line LIMIT.
        let last_line = body.rsplit('\n').next().unwrap_or(body);
        if last_line.contains("--") {
            format!("{}\nLIMIT {}", body, max_rows)
        } else {
            format!("{} LIMIT {}", body, max_rows)
        }
    }
}

fn whole_word_pattern(pattern: &str) -> String {
    let upper = pattern.to_uppercase();
    let body = upper
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");

    let is_word = |c: Option<char>| c.map_or(false, |c| c.is_alphanumeric() || c == '_');
    let lead = if is_word(upper.chars().next()) { r"\b" } else { "" };
    let tail = if is_word(upper.chars().last()) { r"\b" } else { "" };

    format!("{}{}{}", lead, body, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SqlValidator {
        SqlValidator::new(Arc::new(GuardrailPolicy::default())).unwrap()
    }

    fn validator_with(patterns: &[&str], max_rows: u64) -> SqlValidator {
        let policy =
            GuardrailPolicy::new(patterns.iter().map(|p| p.to_string()).collect(), max_rows).unwrap();
        SqlValidator::new(Arc::new(policy)).unwrap()
    }

    #[test]
    fn test_appends_limit_when_missing() {
        let out = validator().validate("SELECT id, name FROM governed.sales").unwrap();
        assert_eq!(out.as_str(), "SELECT id, name FROM governed.sales LIMIT 10000");
    }

    #[test]
    fn test_empty_and_whitespace_rejected() {
        assert_eq!(validator().validate(""), Err(RejectionReason::EmptyInput));
        assert_eq!(validator().validate(" \n\t "), Err(RejectionReason::EmptyInput));
    }

    #[test]
    fn test_fence_only_input_is_not_a_select() {
        assert_eq!(
            validator().validate("```sql\n```"),
            Err(RejectionReason::NotSelectStatement)
        );
    }

    #[test]
    fn test_wildcard_rejected() {
        assert_eq!(
            validator().validate("SELECT * FROM governed.sales"),
            Err(RejectionReason::WildcardSelect)
        );
        assert_eq!(
            validator().validate("select\n  *\nfrom governed.sales"),
            Err(RejectionReason::WildcardSelect)
        );
    }

    #[test]
    fn test_wildcard_in_cte_tail_rejected() {
        assert_eq!(
            validator().validate("WITH cte AS (SELECT id FROM governed.sales) SELECT * FROM cte"),
            Err(RejectionReason::WildcardSelect)
        );
    }

    #[test]
    fn test_count_star_is_not_a_wildcard() {
        let out = validator()
            .validate("SELECT COUNT(*) AS n FROM governed.sales")
            .unwrap();
        assert!(out.as_str().ends_with("LIMIT 10000"));
    }

    #[test]
    fn test_cte_accepted() {
        let out = validator()
            .validate("WITH cte AS (SELECT id FROM governed.sales) SELECT id FROM cte")
            .unwrap();
        assert!(out.as_str().starts_with("WITH cte"));
        assert!(out.as_str().ends_with(" LIMIT 10000"));
    }

    #[test]
    fn test_non_select_rejected() {
        for sql in [
            "DELETE FROM governed.sales",
            "  update governed.sales set qty = 0",
            "SHOW TABLES",
            "EXPLAIN SELECT id FROM governed.sales",
        ] {
            assert_eq!(validator().validate(sql), Err(RejectionReason::NotSelectStatement), "{}", sql);
        }
    }

    #[test]
    fn test_chained_statement_rejected() {
        assert_eq!(
            validator().validate(
                "SELECT id FROM governed.customers; DELETE FROM governed.customers WHERE id=1"
            ),
            Err(RejectionReason::BannedPattern("DELETE".to_string()))
        );
    }

    #[test]
    fn test_banned_word_in_literal_still_rejected() {
        assert_eq!(
            validator().validate("SELECT id FROM governed.sales WHERE name = 'drop'"),
            Err(RejectionReason::BannedPattern("DROP".to_string()))
        );
    }

    #[test]
    fn test_identifier_containing_keyword_allowed() {
        let out = validator()
            .validate("SELECT updated_at, created_by, dropship_flag FROM governed.orders")
            .unwrap();
        assert!(out.as_str().contains("updated_at"));
    }

    #[test]
    fn test_first_banned_pattern_in_policy_order() {
        // DROP is declared before INSERT, so it wins regardless of position.
        assert_eq!(
            validator().validate("SELECT 1; INSERT INTO t VALUES (1); DROP TABLE t"),
            Err(RejectionReason::BannedPattern("DROP".to_string()))
        );
    }

    #[test]
    fn test_phrase_pattern_matches_across_whitespace() {
        let v = validator_with(&["INTO OUTFILE"], 100);
        assert_eq!(
            v.validate("SELECT id FROM t INTO\n   outfile '/tmp/x'"),
            Err(RejectionReason::BannedPattern("INTO OUTFILE".to_string()))
        );
        assert!(v.validate("SELECT into_count FROM t").is_ok());
    }

    #[test]
    fn test_limit_clamped_in_place() {
        let out = validator()
            .validate("SELECT id FROM governed.sales LIMIT 50000")
            .unwrap();
        assert!(out.as_str().contains("LIMIT 10000"));
        assert!(!out.as_str().contains("50000"));
    }

    #[test]
    fn test_lowercase_limit_clamped_and_rest_preserved() {
        let out = validator()
            .validate("select id from governed.sales limit 99999 offset 10;")
            .unwrap();
        assert_eq!(out.as_str(), "select id from governed.sales LIMIT 10000 offset 10;");
    }

    #[test]
    fn test_oversized_limit_literal_clamped() {
        let out = validator()
            .validate("SELECT id FROM t LIMIT 99999999999999999999999")
            .unwrap();
        assert_eq!(out.as_str(), "SELECT id FROM t LIMIT 10000");
    }

    #[test]
    fn test_limit_within_bound_untouched() {
        let out = validator().validate("SELECT id FROM governed.sales LIMIT 10").unwrap();
        assert_eq!(out.as_str(), "SELECT id FROM governed.sales LIMIT 10");
    }

    #[test]
    fn test_only_first_limit_governs() {
        let out = validator()
            .validate("SELECT id FROM (SELECT id FROM t LIMIT 5) s LIMIT 50000")
            .unwrap();
        assert_eq!(out.as_str(), "SELECT id FROM (SELECT id FROM t LIMIT 5) s LIMIT 50000");
    }

    #[test]
    fn test_trailing_semicolons_stripped_before_append() {
        let out = validator().validate("SELECT id FROM governed.sales ;; \n").unwrap();
        assert_eq!(out.as_str(), "SELECT id FROM governed.sales LIMIT 10000");
    }

    #[test]
    fn test_limit_not_appended_inside_trailing_comment() {
        let out = validator()
            .validate("SELECT id FROM governed.sales -- latest rows")
            .unwrap();
        assert_eq!(out.as_str(), "SELECT id FROM governed.sales -- latest rows\nLIMIT 10000");
        let last_line = out.as_str().lines().last().unwrap();
        assert!(!last_line.contains("--"));
        assert_eq!(last_line, "LIMIT 10000");

        // Earlier comment lines do not change the append form.
        let out = validator()
            .validate("-- sales ids\nSELECT id FROM governed.sales")
            .unwrap_err();
        assert_eq!(out, RejectionReason::NotSelectStatement);
        let out = validator()
            .validate("SELECT id -- key\nFROM governed.sales")
            .unwrap();
        assert_eq!(out.as_str(), "SELECT id -- key\nFROM governed.sales LIMIT 10000");
    }

    #[test]
    fn test_commented_query_reaches_fixed_point() {
        let v = validator();
        let once = v.validate("SELECT id FROM governed.sales -- latest rows;").unwrap();
        let twice = v.validate(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_any_fence_language_tag_stripped() {
        for raw in [
            "```sqlite\nSELECT id FROM t\n```",
            "```SQL\nSELECT id FROM t\n```",
            "```spark-sql \nSELECT id FROM t\n```",
            "```sql SELECT id FROM t```",
        ] {
            assert_eq!(
                validator().validate(raw).unwrap().as_str(),
                "SELECT id FROM t LIMIT 10000",
                "{}",
                raw
            );
        }
        // Without a newline the word after the fence is SQL, not a tag.
        assert_eq!(
            validator().validate("```SELECT id FROM t```").unwrap().as_str(),
            "SELECT id FROM t LIMIT 10000"
        );
    }

    #[test]
    fn test_markdown_fences_stripped() {
        let out = validator()
            .validate("  ```sql\nSELECT id FROM governed.sales\n```  ")
            .unwrap();
        assert_eq!(out.as_str(), "SELECT id FROM governed.sales LIMIT 10000");

        let out = validator().validate("```\nSELECT id FROM t\n```").unwrap();
        assert_eq!(out.as_str(), "SELECT id FROM t LIMIT 10000");
    }

    #[test]
    fn test_case_preserved_in_output() {
        let out = validator().validate("select Id, Name from governed.Sales").unwrap();
        assert_eq!(out.as_str(), "select Id, Name from governed.Sales LIMIT 10000");
    }

    #[test]
    fn test_revalidation_is_fixed_point() {
        let v = validator();
        let once = v.validate("SELECT id FROM governed.sales LIMIT 50000;").unwrap();
        let twice = v.validate(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_whole_word_pattern_shapes() {
        assert_eq!(whole_word_pattern("drop"), r"\bDROP\b");
        assert_eq!(whole_word_pattern("into  outfile"), r"\bINTO\s+OUTFILE\b");
        assert_eq!(whole_word_pattern(";"), ";");
    }
}

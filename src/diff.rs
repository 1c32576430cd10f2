//! Unified diff between a failed query and its healed replacement, for
//! audit display. Text diff only; SQL is never reformatted.

use similar::TextDiff;

pub const ORIGINAL_HEADER: &str = "Original SQL (failed)";
pub const HEALED_HEADER: &str = "Healed SQL (succeeded)";

/// Returns `""` when the two queries are identical after trimming.
pub fn sql_diff(original_sql: &str, healed_sql: &str) -> String {
    let original = terminated(original_sql);
    let healed = terminated(healed_sql);

    if original == healed {
        return String::new();
    }

    TextDiff::from_lines(&original, &healed)
        .unified_diff()
        .context_radius(3)
        .header(ORIGINAL_HEADER, HEALED_HEADER)
        .to_string()
}

// Every line ends in '\n' so the last line diffs like any other.
fn terminated(sql: &str) -> String {
    let mut text = sql.trim().to_string();
    text.push('\n');
    text
}

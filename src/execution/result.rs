//! Execution Outcome - what the warehouse said about a validated query

use serde::Serialize;
use serde_json::{Map, Value};

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

/// Statements with no result set come back as a zero-row success.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success { rows: Vec<Row>, columns: Vec<String> },
    Failure { message: String },
}

impl ExecutionOutcome {
    pub fn success(rows: Vec<Row>, columns: Vec<String>) -> Self {
        ExecutionOutcome::Success { rows, columns }
    }

    pub fn empty() -> Self {
        ExecutionOutcome::Success {
            rows: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ExecutionOutcome::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn row_count(&self) -> usize {
        match self {
            ExecutionOutcome::Success { rows, .. } => rows.len(),
            ExecutionOutcome::Failure { .. } => 0,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Failure { message } => Some(message.as_str()),
            ExecutionOutcome::Success { .. } => None,
        }
    }
}

/// Zip positional arrays (as returned by REST warehouses) into keyed rows.
/// Short rows are padded with nulls; surplus cells are dropped.
pub fn rows_from_arrays(columns: &[String], data: Vec<Vec<Value>>) -> Vec<Row> {
    data.into_iter()
        .map(|cells| {
            let mut cells = cells.into_iter();
            columns
                .iter()
                .map(|name| (name.clone(), cells.next().unwrap_or(Value::Null)))
                .collect()
        })
        .collect()
}

//! Query Executor Trait - the warehouse boundary
//!
//! Executors take validator-approved SQL and run it verbatim. They never
//! rewrite the text they are given.

use crate::error::Result;
use crate::execution::result::ExecutionOutcome;
use crate::security::query_guards::ValidatedQuery;
use async_trait::async_trait;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Executor name (e.g., "databricks")
    fn name(&self) -> &'static str;

    /// Run the query. Warehouse-side SQL errors come back as
    /// `Ok(ExecutionOutcome::Failure)`; an `Err` means the call itself broke
    /// (transport, decoding). Callers treat both as a failed attempt.
    async fn execute(&self, sql: &ValidatedQuery) -> Result<ExecutionOutcome>;
}

pub mod databricks_engine;
pub mod engine;
pub mod result;

pub use databricks_engine::DatabricksEngine;
pub use engine::QueryExecutor;
pub use result::{rows_from_arrays, ExecutionOutcome, Row};

pub mod audit;
pub mod config;
pub mod diff;
pub mod error;
pub mod execution;
pub mod llm;
pub mod query_engine;
pub mod security;
pub mod self_healing;

pub use error::{ForgeError, Result};
pub use query_engine::{GovernedQueryEngine, QueryResponse};

//! Databricks Execution Engine
//!
//! Runs validated SQL through the Databricks SQL Statement Execution API
//! (`POST /api/2.0/sql/statements`) and waits inline for the result.

use crate::error::{ForgeError, Result};
use crate::execution::engine::QueryExecutor;
use crate::execution::result::{rows_from_arrays, ExecutionOutcome};
use crate::security::query_guards::ValidatedQuery;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MISSING_CREDENTIALS: &str = "Missing Databricks credentials";

/// Connection settings, usually read from `DATABRICKS_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabricksCredentials {
    pub host: String,
    pub http_path: String,
    pub token: String,
}

impl DatabricksCredentials {
    /// All three values must be present and non-blank.
    pub fn from_parts(host: Option<String>, http_path: Option<String>, token: Option<String>) -> Option<Self> {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Some(Self {
            host: non_blank(host)?,
            http_path: non_blank(http_path)?,
            token: non_blank(token)?,
        })
    }

    /// `/sql/1.0/warehouses/abc123` -> `abc123`
    pub fn warehouse_id(&self) -> Option<&str> {
        self.http_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
    }

    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        }
    }
}

// Statement Execution API response shapes

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: Option<String>,
    status: Option<StatementStatus>,
    manifest: Option<Manifest>,
    result: Option<ResultChunk>,
    // Top-level error body on non-2xx responses
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    message: Option<String>,
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    schema: Option<ManifestSchema>,
}

#[derive(Debug, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ManifestColumn>,
}

#[derive(Debug, Deserialize)]
struct ManifestColumn {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResultChunk {
    data_array: Option<Vec<Vec<serde_json::Value>>>,
}

pub struct DatabricksEngine {
    credentials: Option<DatabricksCredentials>,
    client: Client,
    wait_timeout: Duration,
}

impl DatabricksEngine {
    /// Without credentials the engine still builds; every execution then
    /// reports a failure instead of reaching the network.
    pub fn new(credentials: Option<DatabricksCredentials>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ForgeError::Execution(format!("Failed to create HTTP client for Databricks: {}", e)))?;

        Ok(Self {
            credentials,
            client,
            wait_timeout: Duration::from_secs(30),
        })
    }

    pub fn from_env() -> Result<Self> {
        let credentials = DatabricksCredentials::from_parts(
            std::env::var("DATABRICKS_HOST").ok(),
            std::env::var("DATABRICKS_HTTP_PATH").ok(),
            std::env::var("DATABRICKS_TOKEN").ok(),
        );
        if credentials.is_none() {
            warn!("Databricks credentials not configured; executions will fail");
        }
        Self::new(credentials)
    }

    async fn submit(&self, credentials: &DatabricksCredentials, sql: &str) -> Result<ExecutionOutcome> {
        let warehouse_id = match credentials.warehouse_id() {
            Some(id) => id,
            None => {
                return Ok(ExecutionOutcome::failure(format!(
                    "Cannot derive warehouse id from http path '{}'",
                    credentials.http_path
                )))
            }
        };

        let body = serde_json::json!({
            "statement": sql,
            "warehouse_id": warehouse_id,
            "wait_timeout": format!("{}s", self.wait_timeout.as_secs()),
            "on_wait_timeout": "CANCEL",
            "disposition": "INLINE",
            "format": "JSON_ARRAY",
        });

        let response = self
            .client
            .post(format!("{}/api/2.0/sql/statements", credentials.base_url()))
            .bearer_auth(&credentials.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Execution(format!("Failed to submit Databricks statement: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ForgeError::Execution(format!("Failed to read Databricks response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<StatementResponse>(&text)
                .ok()
                .and_then(|r| r.message)
                .unwrap_or(text);
            return Ok(ExecutionOutcome::failure(format!(
                "Databricks request failed with status {}: {}",
                status, message
            )));
        }

        let parsed: StatementResponse = serde_json::from_str(&text)
            .map_err(|e| ForgeError::Execution(format!("Failed to parse Databricks response: {}", e)))?;

        Ok(outcome_from_response(parsed))
    }
}

fn outcome_from_response(response: StatementResponse) -> ExecutionOutcome {
    let status = match response.status {
        Some(status) => status,
        None => return ExecutionOutcome::failure("Databricks response carried no statement status"),
    };

    if status.state != "SUCCEEDED" {
        let detail = status
            .error
            .map(|e| match (e.error_code, e.message) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (None, Some(message)) => message,
                (Some(code), None) => code,
                (None, None) => String::new(),
            })
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("Statement ended in state {}", status.state));
        return ExecutionOutcome::failure(detail);
    }

    debug!("Statement {:?} succeeded", response.statement_id);

    let columns: Vec<String> = response
        .manifest
        .and_then(|m| m.schema)
        .map(|s| s.columns.into_iter().map(|c| c.name).collect())
        .unwrap_or_default();

    let data = response.result.and_then(|r| r.data_array).unwrap_or_default();

    ExecutionOutcome::success(rows_from_arrays(&columns, data), columns)
}

#[async_trait]
impl QueryExecutor for DatabricksEngine {
    fn name(&self) -> &'static str {
        "databricks"
    }

    async fn execute(&self, sql: &ValidatedQuery) -> Result<ExecutionOutcome> {
        let credentials = match &self.credentials {
            Some(c) => c,
            None => return Ok(ExecutionOutcome::failure(MISSING_CREDENTIALS)),
        };

        let start = Instant::now();
        let outcome = match self.submit(credentials, sql.as_str()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Databricks call failed after {}ms: {}", start.elapsed().as_millis(), e);
                return Ok(ExecutionOutcome::failure(e.to_string()));
            }
        };
        info!(
            "Databricks execution finished in {}ms (success: {}, rows: {})",
            start.elapsed().as_millis(),
            outcome.is_success(),
            outcome.row_count()
        );
        Ok(outcome)
    }
}

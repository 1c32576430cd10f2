use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// API key value that switches the client into offline mode.
pub const DUMMY_API_KEY: &str = "dummy-api-key";

const REPAIR_FUNCTION: &str = "propose_sql_fix";

/// Upper bound on one repair round-trip, connect included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the repair collaborator proposes for a failed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairProposal {
    #[serde(default)]
    pub sql: String,
    #[serde(default, alias = "cannot_answer")]
    pub cannot_fix: bool,
    #[serde(default)]
    pub reason: String,
}

impl RepairProposal {
    pub fn fixed(sql: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            cannot_fix: false,
            reason: reason.into(),
        }
    }

    pub fn cannot_fix(reason: impl Into<String>) -> Self {
        Self {
            sql: String::new(),
            cannot_fix: true,
            reason: reason.into(),
        }
    }
}

/// Repairs a query that failed at execution time.
///
/// Called at most once per healing cycle. Transport or decoding problems
/// are returned as `Err`; a timeout should surface as `ForgeError::Timeout`.
#[async_trait]
pub trait RepairCollaborator: Send + Sync {
    async fn propose_fix(
        &self,
        nl_question: &str,
        failed_sql: &str,
        error_message: &str,
    ) -> Result<RepairProposal>;
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_rows: u64,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self> {
        Ok(Self {
            client: build_http_client(DEFAULT_REQUEST_TIMEOUT)?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_rows: crate::security::policy::DEFAULT_MAX_ROWS,
        })
    }

    /// Replace the request timeout. A call that exceeds it fails with
    /// `ForgeError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_http_client(timeout)?;
        Ok(self)
    }

    /// Row ceiling the model is told to keep in its `LIMIT`.
    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn is_offline(&self) -> bool {
        self.api_key.is_empty() || self.api_key == DUMMY_API_KEY
    }

    fn repair_prompt(&self, nl_question: &str, failed_sql: &str, error_message: &str) -> (String, String) {
        let system = format!(
            r#"You are a SQL self-healing agent. A read-only SQL query failed in the warehouse.
Fix the query using the error message. Rules:
1. Return a single SELECT (or WITH ... SELECT) statement
2. Name every column explicitly, never SELECT *
3. Never use DDL or DML keywords
4. Keep LIMIT {}
If the query cannot be fixed safely, set cannot_fix to true and explain why in reason."#,
            self.max_rows
        );

        let user = format!(
            "Original question: {}\n\nFailed SQL:\n{}\n\nError: {}\n\nPlease fix this SQL query.",
            nl_question, failed_sql, error_message
        );

        (system, user)
    }

    fn repair_function() -> serde_json::Value {
        serde_json::json!({
            "name": REPAIR_FUNCTION,
            "description": "Propose a corrected read-only SQL query for a failed execution",
            "parameters": {
                "type": "object",
                "properties": {
                    "sql": {
                        "type": "string",
                        "description": "The corrected SQL SELECT query. Empty string if cannot_fix is true."
                    },
                    "cannot_fix": {
                        "type": "boolean",
                        "description": "True if the query cannot be repaired safely"
                    },
                    "reason": {
                        "type": "string",
                        "description": "One sentence: what changed, or why it cannot be fixed"
                    }
                },
                "required": ["sql", "cannot_fix", "reason"]
            }
        })
    }

    async fn call_with_function(&self, system: &str, user: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "functions": [Self::repair_function()],
            "function_call": {"name": REPAIR_FUNCTION},
            "temperature": 0.0,
        });

        if self.model.starts_with("gpt-5") || self.model.contains("o1") {
            body["max_completion_tokens"] = serde_json::json!(2000);
        } else if self.model.starts_with("gpt-4") {
            body["max_completion_tokens"] = serde_json::json!(1024);
        } else {
            body["max_tokens"] = serde_json::json!(1024);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ForgeError::Timeout(format!("LLM repair call timed out: {}", e))
                } else {
                    ForgeError::Llm(format!("LLM API call failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ForgeError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ForgeError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(ForgeError::Llm(format!("LLM API error: {}", error)));
        }

        let message = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .map(|choice| &choice["message"])
            .ok_or_else(|| ForgeError::Llm("No choices in LLM response".to_string()))?;

        if let Some(arguments) = message["function_call"]["arguments"].as_str() {
            return Ok(arguments.to_string());
        }

        // Some models answer in content instead of calling the function.
        message["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| ForgeError::Llm("LLM did not call the repair function".to_string()))
    }
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .build()
        .map_err(|e| ForgeError::Llm(format!("Failed to create HTTP client for LLM: {}", e)))
}

/// Accepts function-call arguments, or JSON content optionally wrapped in
/// markdown fences.
pub fn parse_repair_proposal(raw: &str) -> Result<RepairProposal> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned)
        .map_err(|e| ForgeError::Llm(format!("Malformed repair proposal: {}", e)))
}

#[async_trait]
impl RepairCollaborator for LlmClient {
    async fn propose_fix(
        &self,
        nl_question: &str,
        failed_sql: &str,
        error_message: &str,
    ) -> Result<RepairProposal> {
        if self.is_offline() {
            warn!("LLM client is offline; repair not attempted");
            return Ok(RepairProposal::cannot_fix("LLM API key not configured"));
        }

        let (system, user) = self.repair_prompt(nl_question, failed_sql, error_message);
        debug!("Repair prompt:\n{}", user);

        let raw = self.call_with_function(&system, &user).await?;
        let proposal = parse_repair_proposal(&raw)?;
        info!(
            "Repair proposal received (cannot_fix: {}, sql length: {})",
            proposal.cannot_fix,
            proposal.sql.len()
        );
        Ok(proposal)
    }
}

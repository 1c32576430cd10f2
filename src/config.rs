//! Configuration
//!
//! Environment settings plus the YAML governance files found in the config
//! directory (`guardrails.yaml`, `roles.yaml`).

use crate::error::{ForgeError, Result};
use crate::execution::databricks_engine::{DatabricksCredentials, DatabricksEngine};
use crate::llm::{LlmClient, DUMMY_API_KEY};
use crate::security::policy::{GuardrailPolicy, GuardrailsDocument, RoleTableMap};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const GUARDRAILS_FILE: &str = "guardrails.yaml";
pub const ROLES_FILE: &str = "roles.yaml";

const DEFAULT_CONFIG_DIR: &str = "config";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";

/// Load `.env` into the process environment. Variables that are already
/// set keep their values. Call once from the binary.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(_) => info!("No .env file found; using process environment"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub databricks: Option<DatabricksCredentials>,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_base_url: String,
    pub audit_log: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let llm_api_key = get("LLM_API_KEY")
            .or_else(|| get("OPENAI_API_KEY"))
            .unwrap_or_else(|| DUMMY_API_KEY.to_string());

        Self {
            config_dir: get("DATAFORGE_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR)),
            databricks: DatabricksCredentials::from_parts(
                get("DATABRICKS_HOST"),
                get("DATABRICKS_HTTP_PATH"),
                get("DATABRICKS_TOKEN"),
            ),
            llm_api_key,
            llm_model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_base_url: get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            audit_log: get("DATAFORGE_AUDIT_LOG").map(PathBuf::from),
        }
    }

    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    pub fn llm_client(&self, policy: &GuardrailPolicy) -> Result<LlmClient> {
        Ok(LlmClient::new(
            self.llm_api_key.clone(),
            self.llm_model.clone(),
            self.llm_base_url.clone(),
        )?
        .with_max_rows(policy.max_rows()))
    }

    pub fn databricks_engine(&self) -> Result<DatabricksEngine> {
        if self.databricks.is_none() {
            warn!("Databricks credentials not configured; executions will fail");
        }
        DatabricksEngine::new(self.databricks.clone())
    }

    pub fn load_policy(&self) -> Result<GuardrailPolicy> {
        load_policy(&self.config_dir)
    }
}

/// Read `guardrails.yaml` and `roles.yaml` from `dir`. A missing file
/// falls back to defaults (canonical guardrails, no roles); a malformed
/// one is an error.
pub fn load_policy(dir: impl AsRef<Path>) -> Result<GuardrailPolicy> {
    let dir = dir.as_ref();

    let doc: GuardrailsDocument = load_yaml(&dir.join(GUARDRAILS_FILE))?.unwrap_or_else(|| {
        warn!("{} not found in {}; using default guardrails", GUARDRAILS_FILE, dir.display());
        GuardrailsDocument::default()
    });
    let roles: RoleTableMap = load_yaml(&dir.join(ROLES_FILE))?.unwrap_or_default();

    let policy = GuardrailPolicy::from_documents(doc, roles)?;
    info!(
        "Loaded guardrail policy: max_rows={}, {} banned patterns, {} tables, {} roles",
        policy.max_rows(),
        policy.banned_patterns().len(),
        policy.allowed_tables().len(),
        policy.roles().len()
    );
    Ok(policy)
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ForgeError::Config(format!("Failed to read {}: {}", path.display(), e)))
        }
    };
    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|e| ForgeError::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

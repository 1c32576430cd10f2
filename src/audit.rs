//! Audit Records
//!
//! One record per governed query run: what was asked, what was generated,
//! what actually ran, and whether the self-healing agent stepped in.
//! Where records end up is up to the sink.

use crate::error::{ForgeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Healed,
    Rejected,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Healed => "healed",
            AuditStatus::Rejected => "rejected",
            AuditStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    /// SQL as it came from the generator, before guardrails.
    pub generated_sql: String,
    /// SQL that produced the reported outcome. Empty when rejected.
    pub final_sql: String,
    pub status: AuditStatus,
    pub agent_retried: bool,
    pub retry_diff: String,
    pub error: Option<String>,
}

impl AuditRecord {
    pub fn new(question: &str, generated_sql: &str, status: AuditStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            question: question.to_string(),
            generated_sql: generated_sql.to_string(),
            final_sql: String::new(),
            status,
            agent_retried: false,
            retry_diff: String::new(),
            error: None,
        }
    }
}

/// Destination for audit records. Callers log and swallow sink errors.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        info!(
            audit_id = %record.id,
            status = record.status.as_str(),
            agent_retried = record.agent_retried,
            sql_len = record.final_sql.len(),
            error = record.error.as_deref().unwrap_or(""),
            "Query audited"
        );
        Ok(())
    }
}

/// Appends one JSON line per record.
pub struct JsonlAuditSink {
    path: PathBuf,
    // Serializes appends from concurrent runs
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, oldest first.
    pub fn load_all(&self) -> Result<Vec<AuditRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(ForgeError::from))
            .collect()
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| ForgeError::Audit("audit log lock poisoned".to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ForgeError::Audit(format!("Failed to open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ForgeError::Audit(format!("Failed to append audit record: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_jsonl_sink_appends_records() {
        let dir = tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("logs").join("audit.jsonl"));

        let mut healed = AuditRecord::new("stock cost", "SELECT qoh_cost FROM inv", AuditStatus::Healed);
        healed.final_sql = "SELECT qoh_costs FROM inv LIMIT 10000".to_string();
        healed.agent_retried = true;
        healed.retry_diff = "-a\n+b\n".to_string();
        let rejected = AuditRecord::new("drop it", "DROP TABLE inv", AuditStatus::Rejected);

        sink.record(&healed).unwrap();
        sink.record(&rejected).unwrap();

        let records = sink.load_all().unwrap();
        assert_eq!(records, vec![healed, rejected]);
    }

    #[test]
    fn test_missing_log_loads_empty() {
        let dir = tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("absent.jsonl"));
        assert!(sink.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let record = AuditRecord::new("q", "SELECT 1", AuditStatus::Failed);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["agent_retried"], false);
    }

    #[test]
    fn test_tracing_sink_never_fails() {
        let record = AuditRecord::new("q", "SELECT 1", AuditStatus::Success);
        assert!(TracingAuditSink.record(&record).is_ok());
    }
}

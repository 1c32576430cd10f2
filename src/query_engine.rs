//! Governed Query Engine
//!
//! Caller-facing entry point: guardrails first, then execution with one
//! bounded healing cycle, then an audit record. Everything a caller can
//! see is a `QueryResponse`; nothing here returns an error.

use crate::audit::{AuditRecord, AuditSink, AuditStatus};
use crate::error::Result;
use crate::execution::{ExecutionOutcome, QueryExecutor};
use crate::llm::RepairCollaborator;
use crate::security::{GuardrailPolicy, RejectionReason, SqlValidator};
use crate::self_healing::{HealFailure, HealStatus, HealingReport, SelfHealingCoordinator};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResponse {
    /// First-pass guardrails refused the generated SQL. Never retried.
    Rejected {
        audit_id: Uuid,
        reason: RejectionReason,
    },
    Executed {
        audit_id: Uuid,
        report: HealingReport,
    },
}

impl QueryResponse {
    pub fn audit_id(&self) -> Uuid {
        match self {
            QueryResponse::Rejected { audit_id, .. } | QueryResponse::Executed { audit_id, .. } => *audit_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, QueryResponse::Executed { report, .. } if report.outcome.is_success())
    }

    pub fn report(&self) -> Option<&HealingReport> {
        match self {
            QueryResponse::Executed { report, .. } => Some(report),
            QueryResponse::Rejected { .. } => None,
        }
    }

    /// Deterministic explanation for an end user. Driver and LLM error text
    /// never appears here.
    pub fn user_message(&self) -> String {
        match self {
            QueryResponse::Rejected { reason, .. } => {
                format!("This query was blocked by data governance guardrails. {}.", reason)
            }
            QueryResponse::Executed { report, .. } => match &report.status {
                HealStatus::FirstTry => format!("Query returned {} row(s).", report.outcome.row_count()),
                HealStatus::Healed => format!(
                    "The first attempt failed, so the query was corrected automatically and returned {} row(s). Review the diff to see what changed.",
                    report.outcome.row_count()
                ),
                HealStatus::Failed(failure) => failure_message(failure),
            },
        }
    }
}

fn failure_message(failure: &HealFailure) -> String {
    let detail = match failure {
        HealFailure::CannotFix(_) => "The self-healing agent could not find a safe fix.",
        HealFailure::EmptyProposal => "The self-healing agent did not propose a replacement query.",
        HealFailure::Rejected(_) => "The proposed fix was blocked by data governance guardrails.",
        HealFailure::ExecutionFailed(_) => "The corrected query also failed.",
        HealFailure::Timeout(_) => "The self-healing agent did not respond in time.",
        HealFailure::Collaborator(_) => "The self-healing agent was unavailable.",
    };
    format!("The query failed and could not be repaired. {}", detail)
}

pub struct GovernedQueryEngine {
    validator: Arc<SqlValidator>,
    coordinator: SelfHealingCoordinator,
    audit: Vec<Arc<dyn AuditSink>>,
}

impl GovernedQueryEngine {
    pub fn new(
        policy: Arc<GuardrailPolicy>,
        executor: Arc<dyn QueryExecutor>,
        repairer: Arc<dyn RepairCollaborator>,
    ) -> Result<Self> {
        let validator = Arc::new(SqlValidator::new(policy)?);
        let coordinator = SelfHealingCoordinator::new(validator.clone(), executor, repairer);
        Ok(Self {
            validator,
            coordinator,
            audit: Vec::new(),
        })
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit.push(sink);
        self
    }

    pub fn validator(&self) -> &SqlValidator {
        &self.validator
    }

    pub async fn run(&self, question: &str, raw_sql: &str) -> QueryResponse {
        let validated = match self.validator.validate(raw_sql) {
            Ok(query) => query,
            Err(reason) => {
                let mut record = AuditRecord::new(question, raw_sql, AuditStatus::Rejected);
                record.error = Some(reason.to_string());
                self.emit(&record);
                return QueryResponse::Rejected {
                    audit_id: record.id,
                    reason,
                };
            }
        };

        let report = self
            .coordinator
            .execute_with_healing(&validated, question)
            .await;

        let status = match (&report.status, &report.outcome) {
            (HealStatus::Healed, _) => AuditStatus::Healed,
            (_, ExecutionOutcome::Success { .. }) => AuditStatus::Success,
            _ => AuditStatus::Failed,
        };
        info!(
            "Governed run finished: {} after {} execution(s)",
            status.as_str(),
            report.executions
        );

        let mut record = AuditRecord::new(question, raw_sql, status);
        record.final_sql = report.final_query.clone();
        record.agent_retried = report.attempt.is_some();
        record.retry_diff = report.diff_text.clone();
        record.error = report
            .failure()
            .map(|f| f.to_string())
            .or_else(|| report.outcome.error_message().map(str::to_string));
        self.emit(&record);

        QueryResponse::Executed {
            audit_id: record.id,
            report,
        }
    }

    fn emit(&self, record: &AuditRecord) {
        for sink in &self.audit {
            if let Err(e) = sink.record(record) {
                warn!("Audit sink failed for {}: {}", record.id, e);
            }
        }
    }
}

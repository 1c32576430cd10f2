//! Self-Healing Retry Coordinator
//!
//! Wraps one execution with a single bounded repair cycle:
//!
//! ```text
//! Initial --success--> FirstTry
//!    |failure
//!    v
//! Healing --cannot fix / empty / rejected / collaborator error--> Failed
//!    |validated fix
//!    v
//! Reexecuting --success--> Healed (with diff)
//!    |failure
//!    v
//! Failed
//! ```
//!
//! Every collaborator error is turned into a terminal state here; nothing
//! leaves `execute_with_healing` as an `Err`.

use crate::diff::sql_diff;
use crate::error::ForgeError;
use crate::execution::{ExecutionOutcome, QueryExecutor};
use crate::llm::RepairCollaborator;
use crate::security::query_guards::{RejectionReason, SqlValidator, ValidatedQuery};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Healing attempts allowed per call. Fixed at one to bound latency and
/// LLM cost per user action; raising it changes the retry contract.
pub const MAX_RETRIES: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum HealDecision {
    FixedQuery,
    CannotFix(String),
}

/// Why a healing cycle ended without a usable result.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealFailure {
    #[error("Could not fix the query: {0}")]
    CannotFix(String),

    #[error("Repair returned an empty query")]
    EmptyProposal,

    #[error("Healed query rejected by guardrails: {0}")]
    Rejected(RejectionReason),

    #[error("Healed query failed again: {0}")]
    ExecutionFailed(String),

    #[error("Repair request timed out: {0}")]
    Timeout(String),

    #[error("Repair request failed: {0}")]
    Collaborator(String),
}

/// Record of one heal cycle, kept for audit display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealAttempt {
    pub original_query: String,
    pub error_message: String,
    pub healed_query: Option<String>,
    pub decision: HealDecision,
    pub diff_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealStatus {
    FirstTry,
    Healed,
    Failed(HealFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealingReport {
    pub outcome: ExecutionOutcome,
    pub healed: bool,
    pub diff_text: String,
    /// Query whose outcome is reported.
    pub final_query: String,
    pub status: HealStatus,
    pub attempt: Option<HealAttempt>,
    pub executions: u32,
}

impl HealingReport {
    pub fn failure(&self) -> Option<&HealFailure> {
        match &self.status {
            HealStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

enum HealState {
    Initial,
    Healing {
        failing_query: ValidatedQuery,
        error_message: String,
        failed: ExecutionOutcome,
    },
    Reexecuting {
        query: ValidatedQuery,
        error_message: String,
    },
    Failed {
        reason: HealFailure,
        reported: ExecutionOutcome,
        final_query: String,
        error_message: String,
        healed_query: Option<String>,
    },
}

pub struct SelfHealingCoordinator {
    validator: Arc<SqlValidator>,
    executor: Arc<dyn QueryExecutor>,
    repairer: Arc<dyn RepairCollaborator>,
}

impl SelfHealingCoordinator {
    pub fn new(
        validator: Arc<SqlValidator>,
        executor: Arc<dyn QueryExecutor>,
        repairer: Arc<dyn RepairCollaborator>,
    ) -> Self {
        Self {
            validator,
            executor,
            repairer,
        }
    }

    pub fn validator(&self) -> &SqlValidator {
        &self.validator
    }

    /// Execute `original`, healing at most `MAX_RETRIES` times on a
    /// warehouse failure. The two possible executions run strictly in
    /// sequence.
    pub async fn execute_with_healing(&self, original: &ValidatedQuery, nl_question: &str) -> HealingReport {
        let mut executions = 0u32;
        let mut repairs = 0u32;
        let mut state = HealState::Initial;

        loop {
            state = match state {
                HealState::Initial => {
                    let outcome = self.run(original, &mut executions).await;
                    match outcome.error_message().map(str::to_string) {
                        None => {
                            info!("Query succeeded on first execution");
                            return HealingReport {
                                outcome,
                                healed: false,
                                diff_text: String::new(),
                                final_query: original.to_string(),
                                status: HealStatus::FirstTry,
                                attempt: None,
                                executions,
                            };
                        }
                        Some(message) => {
                            warn!("Query failed, entering healing: {}", message);
                            HealState::Healing {
                                failing_query: original.clone(),
                                error_message: message,
                                failed: outcome,
                            }
                        }
                    }
                }

                HealState::Healing {
                    failing_query,
                    error_message,
                    failed,
                } => {
                    repairs += 1;
                    debug_assert!(repairs <= MAX_RETRIES, "Healing is entered only from Initial");
                    match self.repair(&failing_query, &error_message, nl_question).await {
                        Err(reason) => HealState::Failed {
                            reason,
                            reported: failed,
                            final_query: failing_query.to_string(),
                            error_message,
                            healed_query: None,
                        },
                        Ok(proposed) => match self.validator.validate(&proposed) {
                            Ok(query) => {
                                info!("Healed query passed guardrails; re-executing");
                                HealState::Reexecuting { query, error_message }
                            }
                            Err(rejection) => HealState::Failed {
                                reason: HealFailure::Rejected(rejection),
                                reported: failed,
                                final_query: failing_query.to_string(),
                                error_message,
                                healed_query: Some(proposed),
                            },
                        },
                    }
                }

                HealState::Reexecuting { query, error_message } => {
                    let outcome = self.run(&query, &mut executions).await;
                    match outcome.error_message().map(str::to_string) {
                        None => {
                            let diff_text = sql_diff(original.as_str(), query.as_str());
                            info!("Healed query succeeded after {} execution(s)", executions);
                            return HealingReport {
                                outcome,
                                healed: true,
                                diff_text: diff_text.clone(),
                                final_query: query.to_string(),
                                status: HealStatus::Healed,
                                attempt: Some(HealAttempt {
                                    original_query: original.to_string(),
                                    error_message,
                                    healed_query: Some(query.to_string()),
                                    decision: HealDecision::FixedQuery,
                                    diff_text,
                                }),
                                executions,
                            };
                        }
                        Some(message) => {
                            warn!("Healed query failed again: {}", message);
                            HealState::Failed {
                                reason: HealFailure::ExecutionFailed(message),
                                final_query: query.to_string(),
                                error_message,
                                healed_query: Some(query.to_string()),
                                reported: outcome,
                            }
                        }
                    }
                }

                HealState::Failed {
                    reason,
                    reported,
                    final_query,
                    error_message,
                    healed_query,
                } => {
                    warn!("Healing failed: {}", reason);
                    return HealingReport {
                        outcome: reported,
                        healed: false,
                        diff_text: String::new(),
                        final_query,
                        attempt: Some(HealAttempt {
                            original_query: original.to_string(),
                            error_message,
                            healed_query,
                            decision: HealDecision::CannotFix(reason.to_string()),
                            diff_text: String::new(),
                        }),
                        status: HealStatus::Failed(reason),
                        executions,
                    };
                }
            };
        }
    }

    async fn run(&self, query: &ValidatedQuery, executions: &mut u32) -> ExecutionOutcome {
        *executions += 1;
        debug!("Executing via {} (attempt {}): {}", self.executor.name(), executions, query);
        match self.executor.execute(query).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Executor error converted to failure: {}", e);
                ExecutionOutcome::failure(e.to_string())
            }
        }
    }

    async fn repair(
        &self,
        failing_query: &ValidatedQuery,
        error_message: &str,
        nl_question: &str,
    ) -> Result<String, HealFailure> {
        let proposal = self
            .repairer
            .propose_fix(nl_question, failing_query.as_str(), error_message)
            .await
            .map_err(|e| match e {
                ForgeError::Timeout(msg) => HealFailure::Timeout(msg),
                other => HealFailure::Collaborator(other.to_string()),
            })?;

        if proposal.cannot_fix {
            let reason = if proposal.reason.trim().is_empty() {
                "Cannot fix this query".to_string()
            } else {
                proposal.reason
            };
            return Err(HealFailure::CannotFix(reason));
        }

        if proposal.sql.trim().is_empty() {
            return Err(HealFailure::EmptyProposal);
        }

        Ok(proposal.sql)
    }
}

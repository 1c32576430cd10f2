use dataforge_guard::audit::{JsonlAuditSink, TracingAuditSink};
use dataforge_guard::config::{self, Settings};
use dataforge_guard::diff::sql_diff;
use dataforge_guard::security::{validate_dashboard_spec, DashboardSpec, SqlValidator};
use dataforge_guard::{GovernedQueryEngine, QueryResponse};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const REJECTED_EXIT_CODE: i32 = 2;

#[derive(Parser)]
#[command(name = "dataforge-guard")]
#[command(about = "Governed SQL guardrails with bounded self-healing execution")]
#[command(version)]
struct Args {
    /// Directory holding guardrails.yaml and roles.yaml (or set DATAFORGE_CONFIG_DIR)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a SQL query against the guardrails and print the query that would run
    Validate {
        sql: String,
    },
    /// Print the unified diff between a failed query and its healed version
    Diff {
        original: String,
        healed: String,
    },
    /// Validate, execute on Databricks and self-heal once on failure
    Run {
        /// The natural-language question the SQL answers
        #[arg(short, long)]
        question: String,

        /// Also print the full execution report, including raw warehouse errors
        #[arg(short, long)]
        verbose: bool,

        sql: String,
    },
    /// Govern a dashboard spec (JSON file) for a role
    CheckSpec {
        #[arg(short, long, default_value = "viewer")]
        role: String,

        spec_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = Settings::from_env();
    if let Some(dir) = args.config_dir {
        settings = settings.with_config_dir(dir);
    }
    let policy = Arc::new(
        settings
            .load_policy()
            .with_context(|| format!("Failed to load policy from {}", settings.config_dir.display()))?,
    );

    match args.command {
        Commands::Validate { sql } => {
            let validator = SqlValidator::new(policy)?;
            match validator.validate(&sql) {
                Ok(query) => println!("{}", query),
                Err(reason) => {
                    eprintln!("Rejected: {}", reason);
                    std::process::exit(REJECTED_EXIT_CODE);
                }
            }
        }
        Commands::Diff { original, healed } => {
            let diff = sql_diff(&original, &healed);
            if diff.is_empty() {
                println!("No changes.");
            } else {
                print!("{}", diff);
            }
        }
        Commands::Run { question, verbose, sql } => {
            let executor = Arc::new(settings.databricks_engine()?);
            let repairer = Arc::new(settings.llm_client(&policy)?);
            let mut engine = GovernedQueryEngine::new(policy, executor, repairer)?
                .with_audit_sink(Arc::new(TracingAuditSink));
            if let Some(path) = &settings.audit_log {
                info!("Appending audit records to {}", path.display());
                engine = engine.with_audit_sink(Arc::new(JsonlAuditSink::new(path.clone())));
            }

            let response = engine.run(&question, &sql).await;
            println!("{}", render_run(&response, verbose)?);
        }
        Commands::CheckSpec { role, spec_file } => {
            let content = std::fs::read_to_string(&spec_file)
                .with_context(|| format!("Failed to read {}", spec_file.display()))?;
            let spec: DashboardSpec = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", spec_file.display()))?;

            let governed = validate_dashboard_spec(&spec, &role, &policy);
            println!("{}", serde_json::to_string_pretty(&governed)?);
        }
    }

    Ok(())
}

/// End users get the plain message; the full report (raw driver and LLM
/// errors included) only with `--verbose`.
fn render_run(response: &QueryResponse, verbose: bool) -> Result<String> {
    let mut summary = serde_json::json!({
        "audit_id": response.audit_id(),
        "message": response.user_message(),
    });
    if verbose {
        summary["response"] = serde_json::to_value(response)?;
    }
    Ok(serde_json::to_string_pretty(&summary)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataforge_guard::execution::ExecutionOutcome;
    use dataforge_guard::self_healing::{HealFailure, HealStatus, HealingReport};
    use uuid::Uuid;

    fn failed_response() -> QueryResponse {
        QueryResponse::Executed {
            audit_id: Uuid::nil(),
            report: HealingReport {
                outcome: ExecutionOutcome::failure("[UNRESOLVED_COLUMN] qoh_cost at line 1, pos 7"),
                healed: false,
                diff_text: String::new(),
                final_query: "SELECT qoh_cost FROM inv LIMIT 10000".to_string(),
                status: HealStatus::Failed(HealFailure::Collaborator("HTTP 503 from provider".to_string())),
                attempt: None,
                executions: 1,
            },
        }
    }

    #[test]
    fn test_run_output_hides_raw_errors_by_default() {
        let out = render_run(&failed_response(), false).unwrap();
        assert!(out.contains("could not be repaired"));
        assert!(!out.contains("UNRESOLVED_COLUMN"));
        assert!(!out.contains("503"));
    }

    #[test]
    fn test_verbose_run_output_includes_report() {
        let out = render_run(&failed_response(), true).unwrap();
        assert!(out.contains("UNRESOLVED_COLUMN"));
        assert!(out.contains("503"));
    }
}

//! Access Control
//!
//! Governs a generated dashboard spec before anything is rendered or
//! queried: tables must be approved globally and for the caller's role,
//! chart types must be supported. Violations are removed with a reason,
//! never raised.

use crate::security::policy::{GuardrailPolicy, FALLBACK_ROLE};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Structured dashboard request produced upstream from natural language.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSpec {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub charts: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
}

/// A spec with ungoverned entries removed, plus why each one went.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernedSpec {
    pub spec: DashboardSpec,
    pub violations: Vec<String>,
}

impl GovernedSpec {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub fn validate_dashboard_spec(
    spec: &DashboardSpec,
    role: &str,
    policy: &GuardrailPolicy,
) -> GovernedSpec {
    let mut violations = Vec::new();
    let mut cleaned = spec.clone();

    let role_access = match policy.role(role) {
        Some(config) => config.allowed_tables.clone(),
        None => {
            violations.push(format!(
                "Role '{}' not recognized. Defaulting to '{}' restrictions.",
                role, FALLBACK_ROLE
            ));
            policy
                .role(FALLBACK_ROLE)
                .map(|config| config.allowed_tables.clone())
                .unwrap_or_default()
        }
    };

    cleaned.tables = spec
        .tables
        .iter()
        .filter(|table| {
            if !policy.allowed_tables().contains(table.as_str()) {
                violations.push(format!(
                    "Table '{}' was removed because it is not an approved governed table.",
                    table
                ));
                false
            } else if !role_access.permits(table) {
                violations.push(format!(
                    "Table '{}' was removed because your role '{}' does not have access to it.",
                    table, role
                ));
                false
            } else {
                true
            }
        })
        .cloned()
        .collect();

    cleaned.charts = spec
        .charts
        .iter()
        .filter(|chart| {
            let supported = policy.allowed_chart_types().contains(chart.as_str());
            if !supported {
                violations.push(format!(
                    "Chart type '{}' was removed because it is not supported by the platform.",
                    chart
                ));
            }
            supported
        })
        .cloned()
        .collect();

    if violations.is_empty() {
        info!("Dashboard spec '{}' passed governance for role '{}'", spec.title, role);
    } else {
        warn!(
            "Dashboard spec '{}' had {} governance violation(s) for role '{}'",
            spec.title,
            violations.len(),
            role
        );
    }

    GovernedSpec {
        spec: cleaned,
        violations,
    }
}

/// True when the role may read every table in `tables`.
pub fn role_can_read(policy: &GuardrailPolicy, role: &str, tables: &[String]) -> bool {
    let access = policy
        .role(role)
        .map(|config| config.allowed_tables.clone())
        .unwrap_or_default();
    tables.iter().all(|t| policy.allowed_tables().contains(t) && access.permits(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::policy::{RoleConfig, RoleTableMap, TableAccess};

    fn policy() -> GuardrailPolicy {
        let mut roles = RoleTableMap::new();
        roles.insert(
            "admin".to_string(),
            RoleConfig {
                allowed_tables: TableAccess::All,
            },
        );
        roles.insert(
            "viewer".to_string(),
            RoleConfig {
                allowed_tables: TableAccess::Tables(["governed.sales".to_string()].into_iter().collect()),
            },
        );

        GuardrailPolicy::default()
            .with_allowed_tables(["governed.sales", "governed.customers"])
            .with_allowed_chart_types(["bar", "line"])
            .with_roles(roles)
    }

    fn spec() -> DashboardSpec {
        DashboardSpec {
            title: "Sales overview".to_string(),
            tables: vec![
                "governed.sales".to_string(),
                "governed.customers".to_string(),
                "raw.payroll".to_string(),
            ],
            charts: vec!["bar".to_string(), "sankey".to_string()],
            metrics: vec!["revenue".to_string()],
        }
    }

    #[test]
    fn test_admin_keeps_all_approved_tables() {
        let governed = validate_dashboard_spec(&spec(), "admin", &policy());
        assert_eq!(governed.spec.tables, vec!["governed.sales", "governed.customers"]);
        assert_eq!(governed.spec.charts, vec!["bar"]);
        assert_eq!(governed.violations.len(), 2);
        assert!(governed.violations[0].contains("raw.payroll"));
        assert!(governed.violations[1].contains("sankey"));
    }

    #[test]
    fn test_viewer_loses_tables_outside_role() {
        let governed = validate_dashboard_spec(&spec(), "viewer", &policy());
        assert_eq!(governed.spec.tables, vec!["governed.sales"]);
        assert!(governed
            .violations
            .iter()
            .any(|v| v.contains("role 'viewer' does not have access")));
    }

    #[test]
    fn test_unknown_role_falls_back_to_viewer() {
        let governed = validate_dashboard_spec(&spec(), "intern", &policy());
        assert!(governed.violations[0].starts_with("Role 'intern' not recognized"));
        assert_eq!(governed.spec.tables, vec!["governed.sales"]);
        assert_eq!(governed.spec.metrics, vec!["revenue"]);
    }

    #[test]
    fn test_clean_spec_has_no_violations() {
        let clean = DashboardSpec {
            title: "ok".to_string(),
            tables: vec!["governed.sales".to_string()],
            charts: vec!["line".to_string()],
            metrics: vec![],
        };
        assert!(validate_dashboard_spec(&clean, "viewer", &policy()).is_clean());
    }

    #[test]
    fn test_role_can_read() {
        let p = policy();
        assert!(role_can_read(&p, "admin", &["governed.customers".to_string()]));
        assert!(!role_can_read(&p, "viewer", &["governed.customers".to_string()]));
        assert!(!role_can_read(&p, "ghost", &["governed.sales".to_string()]));
    }
}

//! Guardrail Policy
//!
//! Governance configuration shared read-only by every validator and
//! coordinator. Built once at startup, never mutated afterwards.

use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Hard ceiling applied when the configuration does not name one.
pub const DEFAULT_MAX_ROWS: u64 = 10_000;

/// Canonical DML/DDL keywords rejected as whole words.
pub const DEFAULT_BANNED_PATTERNS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "CREATE",
    "REPLACE",
];

/// Role used when a caller presents an unknown role.
pub const FALLBACK_ROLE: &str = "viewer";

/// Which governed tables a role may reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTableAccess")]
pub enum TableAccess {
    All,
    Tables(BTreeSet<String>),
}

impl Default for TableAccess {
    fn default() -> Self {
        TableAccess::Tables(BTreeSet::new())
    }
}

impl TableAccess {
    pub fn permits(&self, table: &str) -> bool {
        match self {
            TableAccess::All => true,
            TableAccess::Tables(tables) => tables.contains(table),
        }
    }
}

// `allowed_tables: all` or `allowed_tables: [a, b]`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTableAccess {
    Keyword(String),
    Tables(Vec<String>),
}

impl TryFrom<RawTableAccess> for TableAccess {
    type Error = String;

    fn try_from(raw: RawTableAccess) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawTableAccess::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(TableAccess::All),
            RawTableAccess::Keyword(k) => Err(format!(
                "allowed_tables must be 'all' or a list of tables, got '{}'",
                k
            )),
            RawTableAccess::Tables(tables) => Ok(TableAccess::Tables(tables.into_iter().collect())),
        }
    }
}

/// Per-role governance entry from `roles.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub allowed_tables: TableAccess,
}

pub type RoleTableMap = BTreeMap<String, RoleConfig>;

/// Shape of `guardrails.yaml`. Every field is optional on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsDocument {
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
    #[serde(default = "default_banned_patterns")]
    pub banned_patterns: Vec<String>,
    #[serde(default)]
    pub allowed_tables: Vec<String>,
    #[serde(default)]
    pub allowed_chart_types: Vec<String>,
}

impl Default for GuardrailsDocument {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            banned_patterns: default_banned_patterns(),
            allowed_tables: Vec::new(),
            allowed_chart_types: Vec::new(),
        }
    }
}

fn default_max_rows() -> u64 {
    DEFAULT_MAX_ROWS
}

fn default_banned_patterns() -> Vec<String> {
    DEFAULT_BANNED_PATTERNS.iter().map(|p| p.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailPolicy {
    banned_patterns: Vec<String>,
    max_rows: u64,
    allowed_tables: BTreeSet<String>,
    allowed_chart_types: BTreeSet<String>,
    roles: RoleTableMap,
}

impl GuardrailPolicy {
    /// Fails when `max_rows` is zero. An empty pattern list is legal but
    /// turns the keyword sweep off, so it is reported loudly.
    pub fn new(banned_patterns: Vec<String>, max_rows: u64) -> Result<Self> {
        if max_rows == 0 {
            return Err(ForgeError::Policy("max_rows must be greater than zero".to_string()));
        }

        let banned_patterns: Vec<String> = banned_patterns
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if banned_patterns.is_empty() {
            warn!("Guardrail policy has no banned patterns; keyword protection is disabled");
        }

        Ok(Self {
            banned_patterns,
            max_rows,
            allowed_tables: BTreeSet::new(),
            allowed_chart_types: BTreeSet::new(),
            roles: RoleTableMap::new(),
        })
    }

    pub fn from_documents(doc: GuardrailsDocument, roles: RoleTableMap) -> Result<Self> {
        Ok(Self::new(doc.banned_patterns, doc.max_rows)?
            .with_allowed_tables(doc.allowed_tables)
            .with_allowed_chart_types(doc.allowed_chart_types)
            .with_roles(roles))
    }

    pub fn with_allowed_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allowed_chart_types<I, S>(mut self, charts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_chart_types = charts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_roles(mut self, roles: RoleTableMap) -> Self {
        self.roles = roles;
        self
    }

    /// Patterns in declared order; the validator reports the first hit.
    pub fn banned_patterns(&self) -> &[String] {
        &self.banned_patterns
    }

    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    pub fn allowed_tables(&self) -> &BTreeSet<String> {
        &self.allowed_tables
    }

    pub fn allowed_chart_types(&self) -> &BTreeSet<String> {
        &self.allowed_chart_types
    }

    pub fn roles(&self) -> &RoleTableMap {
        &self.roles
    }

    pub fn role(&self, name: &str) -> Option<&RoleConfig> {
        self.roles.get(name)
    }
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            banned_patterns: default_banned_patterns(),
            max_rows: DEFAULT_MAX_ROWS,
            allowed_tables: BTreeSet::new(),
            allowed_chart_types: BTreeSet::new(),
            roles: RoleTableMap::new(),
        }
    }
}

//! Shared data model: job kinds, run outcomes, KPI payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three independently scheduled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Etl,
    Backup,
    Report,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Etl, JobKind::Backup, JobKind::Report];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Etl => "etl",
            JobKind::Backup => "backup",
            JobKind::Report => "report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "etl" => Some(JobKind::Etl),
            "backup" => Some(JobKind::Backup),
            "report" => Some(JobKind::Report),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// Data loaded and usable, but quality checks reported issues.
    DegradedWithIssues,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::DegradedWithIssues => "degraded_with_issues",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            "degraded_with_issues" => Some(RunStatus::DegradedWithIssues),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one orchestrator cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Unique run ID.
    pub id: String,
    pub kind: JobKind,
    pub status: RunStatus,
    /// Quality issues found by the validator (ETL runs only).
    #[serde(default)]
    pub issues: Vec<String>,
    /// Error detail for failed runs.
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// The data produced by this run can be used downstream.
    pub fn success(&self) -> bool {
        self.status != RunStatus::Failed
    }
}

/// A tabular payload passed through from the ETL engine untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiTable {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl KpiTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// KPI report produced by the ETL engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    #[serde(default)]
    pub revenue_trends: KpiTable,
    #[serde(default)]
    pub top_products: KpiTable,
    #[serde(default)]
    pub customer_segments: KpiTable,
}

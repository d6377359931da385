//! Collaborator seams. The orchestrator only talks to these.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::Result;
use crate::types::KpiReport;

/// The external ETL engine.
#[async_trait]
pub trait EtlEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Refresh the sales database.
    async fn run(&self) -> Result<()>;

    /// Compute the KPI payload from the current database contents.
    async fn generate_kpi_report(&self) -> Result<KpiReport>;
}

/// Data-quality checks run after a successful load.
#[async_trait]
pub trait QualityCheck: Send + Sync {
    /// Returns every issue found. Empty means healthy. Never fails.
    async fn validate(&self, as_of: NaiveDateTime) -> Vec<String>;
}

/// Alert delivery (email or equivalent).
#[async_trait]
pub trait NotifyTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<()>;
}

/// Turns a KPI payload into human-facing output.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Render the report and return where it was written.
    async fn render(
        &self,
        report: &KpiReport,
        issues: &[String],
        generated_at: NaiveDateTime,
    ) -> Result<String>;
}

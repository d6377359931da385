//! Data-quality checks against the freshly loaded sales database.
//!
//! Three checks run in order (volume, outlier, freshness), each on its own,
//! and each adds at most one human-readable issue. Validation never fails: an unreachable
//! database or a missing table becomes an issue of its own.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OpenFlags};
use salesops_core::config::{QualityThresholds, RunConfig};
use salesops_core::error::{Result, SalesOpsError};
use salesops_core::traits::QualityCheck;
use std::path::PathBuf;
use std::time::Duration;

/// Runs the quality battery against the sales database file.
pub struct QualityValidator {
    database_path: PathBuf,
    thresholds: QualityThresholds,
    timeout: Duration,
}

impl QualityValidator {
    pub fn new(database_path: impl Into<PathBuf>, thresholds: QualityThresholds, timeout: Duration) -> Self {
        Self {
            database_path: database_path.into(),
            thresholds,
            timeout,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            &config.database_path,
            config.quality_thresholds.clone(),
            config.timeouts.query(),
        )
    }

    /// Run every check on an open connection and collect the issues.
    ///
    /// A missing `sales_transactions` table yields a single issue. Otherwise
    /// each check runs on its own, and a check whose query fails reports that
    /// failure as its issue without stopping the others.
    pub fn check(conn: &Connection, thresholds: &QualityThresholds, as_of: NaiveDateTime) -> Vec<String> {
        let mut issues = Vec::new();
        if let Err(e) = conn.prepare("SELECT 1 FROM sales_transactions LIMIT 1") {
            record(&mut issues, Err(e.into()));
            return issues;
        }

        let day = as_of.date().format("%Y-%m-%d").to_string();
        record(&mut issues, check_volume(conn, thresholds, &day));
        record(&mut issues, check_outliers(conn, thresholds, &day));
        record(&mut issues, check_freshness(conn, thresholds, as_of));
        issues
    }
}

#[async_trait]
impl QualityCheck for QualityValidator {
    async fn validate(&self, as_of: NaiveDateTime) -> Vec<String> {
        let path = self.database_path.clone();
        let thresholds = self.thresholds.clone();
        let timeout = self.timeout;
        let (handle_tx, mut handle_rx) = tokio::sync::oneshot::channel();

        let task = tokio::task::spawn_blocking(move || match open_read_only(&path, timeout) {
            Ok(conn) => {
                handle_tx.send(conn.get_interrupt_handle()).ok();
                QualityValidator::check(&conn, &thresholds, as_of)
            }
            Err(e) => {
                let issue = format!("Data quality check failed: {e}");
                tracing::error!("❌ {issue}");
                vec![issue]
            }
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(issues)) => issues,
            Ok(Err(e)) => vec![format!("Data quality check failed: {e}")],
            Err(_) => {
                // Stop the abandoned query instead of letting it run on.
                if let Ok(handle) = handle_rx.try_recv() {
                    handle.interrupt();
                }
                let issue = format!(
                    "Data quality check failed: timed out after {}s",
                    timeout.as_secs()
                );
                tracing::error!("❌ {issue}");
                vec![issue]
            }
        }
    }
}

fn open_read_only(path: &std::path::Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| SalesOpsError::Database(format!("open {}: {e}", path.display())))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

fn record(issues: &mut Vec<String>, outcome: Result<Option<String>>) {
    match outcome {
        Ok(Some(issue)) => {
            tracing::warn!("⚠️ {issue}");
            issues.push(issue);
        }
        Ok(None) => {}
        Err(e) => {
            let issue = format!("Data quality check failed: {e}");
            tracing::error!("❌ {issue}");
            issues.push(issue);
        }
    }
}

fn check_volume(conn: &Connection, thresholds: &QualityThresholds, day: &str) -> Result<Option<String>> {
    let daily_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sales_transactions WHERE DATE(transaction_date) = ?1",
        [day],
        |row| row.get(0),
    )?;
    let min = thresholds.min_daily_transactions;
    Ok(((daily_count.max(0) as u64) < min)
        .then(|| format!("Low transaction count today: {daily_count} (expected at least {min})")))
}

fn check_outliers(conn: &Connection, thresholds: &QualityThresholds, day: &str) -> Result<Option<String>> {
    let max_amount: Option<f64> = conn.query_row(
        "SELECT MAX(total_amount) FROM sales_transactions WHERE DATE(transaction_date) = ?1",
        [day],
        |row| row.get(0),
    )?;
    let max_amount = max_amount.unwrap_or(0.0);
    Ok((max_amount > thresholds.max_transaction_amount).then(|| {
        format!(
            "Unusually high transaction detected: {} (threshold: {})",
            format_currency(max_amount),
            format_currency(thresholds.max_transaction_amount)
        )
    }))
}

/// No rows means nothing to judge.
fn check_freshness(conn: &Connection, thresholds: &QualityThresholds, as_of: NaiveDateTime) -> Result<Option<String>> {
    let latest: Option<String> = conn.query_row(
        "SELECT MAX(transaction_date) FROM sales_transactions",
        [],
        |row| row.get(0),
    )?;
    let Some(raw) = latest else { return Ok(None) };
    let latest = parse_transaction_time(&raw)?;
    let hours_old = (as_of - latest).num_seconds() as f64 / 3600.0;
    Ok((hours_old > thresholds.data_freshness_hours).then(|| {
        format!(
            "Data is stale: {hours_old:.1} hours old (threshold: {}h)",
            thresholds.data_freshness_hours
        )
    }))
}

/// Parse a `transaction_date` value. Date-only values count as midnight.
pub fn parse_transaction_time(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(t);
        }
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Local).naive_local());
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d.and_hms_opt(0, 0, 0).unwrap_or_default());
    }
    Err(SalesOpsError::Database(format!(
        "unrecognized transaction_date value '{raw}'"
    )))
}

/// `$1,234.50` style formatting.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

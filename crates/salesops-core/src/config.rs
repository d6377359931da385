//! Pipeline configuration: a JSON file merged over built-in defaults.
//!
//! Every field has a default, so a config file only needs the keys it wants
//! to override. Unknown keys are ignored. A broken config file never stops
//! the process: [`RunConfig::load`] logs the problem and falls back to
//! defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SalesOpsError};
use crate::types::JobKind;

/// Root configuration. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_backup_path")]
    pub backup_path: String,
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default)]
    pub email_alerts: EmailAlertsConfig,
    #[serde(default = "default_data_sources")]
    pub data_sources: BTreeMap<String, String>,
    #[serde(default)]
    pub quality_thresholds: QualityThresholds,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "default_retention_days")]
    pub backup_retention_days: u32,
    #[serde(default = "bool_true")]
    pub backup_before_etl: bool,
    #[serde(default = "default_report_path")]
    pub report_path: String,
    #[serde(default = "default_state_path")]
    pub state_path: String,
    #[serde(default)]
    pub etl: EtlConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_database_path() -> String { "sales_data.db".into() }
fn default_backup_path() -> String { "backups/".into() }
fn default_log_path() -> String { "logs/".into() }
fn default_report_path() -> String { "reports/".into() }
fn default_state_path() -> String { "salesops_state.db".into() }
fn default_retention_days() -> u32 { 7 }
fn bool_true() -> bool { true }

fn default_data_sources() -> BTreeMap<String, String> {
    ["crm_api_url", "erp_api_url", "pos_api_url"]
        .into_iter()
        .map(|k| (k.to_string(), String::new()))
        .collect()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            backup_path: default_backup_path(),
            log_path: default_log_path(),
            email_alerts: EmailAlertsConfig::default(),
            data_sources: default_data_sources(),
            quality_thresholds: QualityThresholds::default(),
            schedule: ScheduleConfig::default(),
            backup_retention_days: default_retention_days(),
            backup_before_etl: true,
            report_path: default_report_path(),
            state_path: default_state_path(),
            etl: EtlConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load config from `path`.
    ///
    /// Missing file: writes the defaults there and returns them.
    /// Unreadable or malformed file: logs the error and returns defaults.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                for warning in config.warnings() {
                    tracing::warn!("⚠️ Config: {warning}");
                }
                config
            }
            Err(e) => {
                tracing::error!("❌ Error loading config {}: {e}. Using defaults.", path.display());
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            match config.save(path) {
                Ok(()) => tracing::info!("📝 Wrote default config to {}", path.display()),
                Err(e) => tracing::warn!("⚠️ Could not write default config {}: {e}", path.display()),
            }
            return Ok(config);
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SalesOpsError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&content)
    }

    /// Parse a JSON document, filling every missing key with its default.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| SalesOpsError::Config(format!("Failed to parse config: {e}")))
    }

    /// Write this config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SalesOpsError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Non-fatal problems worth telling the operator about.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        let alerts = &self.email_alerts;
        if alerts.enabled {
            if alerts.recipients.is_empty() {
                out.push("email_alerts enabled but no recipients configured".into());
            }
            if alerts.sender_email.is_empty() {
                out.push("email_alerts enabled but sender_email is empty".into());
            }
        }
        if self.backup_retention_days == 0 {
            out.push("backup_retention_days is 0: every backup is pruned immediately".into());
        }
        if self.etl.command.is_empty() {
            out.push("etl.command is empty: ETL runs will fail".into());
        }
        out
    }
}

/// Email alert settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct EmailAlertsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub sender_password: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

fn default_smtp_server() -> String { "smtp.gmail.com".into() }
fn default_smtp_port() -> u16 { 587 }

impl Default for EmailAlertsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: default_smtp_server(),
            smtp_port: default_smtp_port(),
            sender_email: String::new(),
            sender_password: String::new(),
            recipients: Vec::new(),
        }
    }
}

impl std::fmt::Debug for EmailAlertsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailAlertsConfig")
            .field("enabled", &self.enabled)
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("sender_email", &self.sender_email)
            .field("sender_password", &"***")
            .field("recipients", &self.recipients)
            .finish()
    }
}

/// Minimum quality bars for freshly loaded data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityThresholds {
    #[serde(default = "default_min_daily_transactions")]
    pub min_daily_transactions: u64,
    #[serde(default = "default_max_transaction_amount")]
    pub max_transaction_amount: f64,
    #[serde(default = "default_data_freshness_hours")]
    pub data_freshness_hours: f64,
}

fn default_min_daily_transactions() -> u64 { 100 }
fn default_max_transaction_amount() -> f64 { 10_000.0 }
fn default_data_freshness_hours() -> f64 { 24.0 }

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_daily_transactions: default_min_daily_transactions(),
            max_transaction_amount: default_max_transaction_amount(),
            data_freshness_hours: default_data_freshness_hours(),
        }
    }
}

/// Cadence per job kind: `hourly`, `daily`, `weekly`, or an explicit interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_etl_frequency")]
    pub etl_frequency: String,
    #[serde(default = "default_backup_frequency")]
    pub backup_frequency: String,
    #[serde(default = "default_report_frequency")]
    pub report_frequency: String,
}

fn default_etl_frequency() -> String { "hourly".into() }
fn default_backup_frequency() -> String { "daily".into() }
fn default_report_frequency() -> String { "weekly".into() }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            etl_frequency: default_etl_frequency(),
            backup_frequency: default_backup_frequency(),
            report_frequency: default_report_frequency(),
        }
    }
}

impl ScheduleConfig {
    /// The configured frequency string for a job kind.
    pub fn frequency(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Etl => &self.etl_frequency,
            JobKind::Backup => &self.backup_frequency,
            JobKind::Report => &self.report_frequency,
        }
    }

    /// The built-in frequency for a job kind.
    pub fn default_frequency(kind: JobKind) -> &'static str {
        match kind {
            JobKind::Etl => "hourly",
            JobKind::Backup => "daily",
            JobKind::Report => "weekly",
        }
    }
}

/// How the ETL engine is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Program followed by its arguments.
    #[serde(default = "default_etl_command")]
    pub command: Vec<String>,
    /// Extra arguments that make the engine print a KPI report as JSON.
    #[serde(default = "default_report_args")]
    pub report_args: Vec<String>,
}

fn default_etl_command() -> Vec<String> {
    vec!["python3".into(), "sales_etl_pipeline.py".into()]
}
fn default_report_args() -> Vec<String> {
    vec!["--kpi-report".into()]
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            command: default_etl_command(),
            report_args: default_report_args(),
        }
    }
}

/// Upper bounds for every step that touches the outside world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_etl_secs")]
    pub etl_secs: u64,
    #[serde(default = "default_query_secs")]
    pub query_secs: u64,
    #[serde(default = "default_backup_secs")]
    pub backup_secs: u64,
    #[serde(default = "default_notify_secs")]
    pub notify_secs: u64,
    #[serde(default = "default_report_secs")]
    pub report_secs: u64,
}

fn default_etl_secs() -> u64 { 1800 }
fn default_query_secs() -> u64 { 30 }
fn default_backup_secs() -> u64 { 300 }
fn default_notify_secs() -> u64 { 30 }
fn default_report_secs() -> u64 { 600 }

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            etl_secs: default_etl_secs(),
            query_secs: default_query_secs(),
            backup_secs: default_backup_secs(),
            notify_secs: default_notify_secs(),
            report_secs: default_report_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn etl(&self) -> Duration { Duration::from_secs(self.etl_secs) }
    pub fn query(&self) -> Duration { Duration::from_secs(self.query_secs) }
    pub fn backup(&self) -> Duration { Duration::from_secs(self.backup_secs) }
    pub fn notify(&self) -> Duration { Duration::from_secs(self.notify_secs) }
    pub fn report(&self) -> Duration { Duration::from_secs(self.report_secs) }
}

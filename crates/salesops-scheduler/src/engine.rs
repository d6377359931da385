//! Orchestrator: sequences backup → ETL → validate → alert/report and owns
//! the per-job-kind state machines.
//!
//! Each job kind moves `Idle → Running → {Succeeded, Failed,
//! DegradedWithIssues} → Idle`. A kind never has two runs in flight; kinds
//! run independently of each other. The database file is the one shared
//! resource: backups and ETL writes take the same lock so a snapshot never
//! interleaves with a load.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use salesops_core::config::RunConfig;
use salesops_core::error::{Result, SalesOpsError};
use salesops_core::traits::{EtlEngine, QualityCheck, ReportRenderer};
use salesops_core::types::{JobKind, RunOutcome, RunStatus};
use salesops_data::backup::{BackupManager, BackupRecord};
use tokio::sync::watch;

use crate::cadence::{Cadence, JobSchedule};
use crate::clock::Clock;
use crate::notify::Notifier;
use crate::persistence::RunHistoryDb;

/// Alert categories.
pub const ALERT_ETL_FAILED: &str = "ETL Failed";
pub const ALERT_BACKUP_FAILED: &str = "Backup Failed";
pub const ALERT_QUALITY_ISSUES: &str = "Data Quality Issues";
pub const ALERT_VALIDATION_FAILED: &str = "Validation Failed";
pub const ALERT_REPORT_FAILED: &str = "Report Failed";

/// Upper bound on one sleep of the scheduler loop, so wall-clock jumps are
/// noticed promptly.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// State of one job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running { started_at: DateTime<Utc> },
}

struct JobSlot {
    state: JobState,
    schedule: JobSchedule,
    last_status: Option<RunStatus>,
}

/// Collaborators the orchestrator drives.
pub struct Components {
    pub etl: Arc<dyn EtlEngine>,
    pub validator: Arc<dyn QualityCheck>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub notifier: Notifier,
    pub clock: Arc<dyn Clock>,
}

/// Status snapshot for one job kind.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub kind: JobKind,
    pub state: JobState,
    pub cadence: Cadence,
    pub next_fire: DateTime<Utc>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
}

/// Terminal result of a cycle body, before timestamps are attached.
struct CycleResult {
    status: RunStatus,
    issues: Vec<String>,
    error: Option<String>,
}

impl CycleResult {
    fn succeeded() -> Self {
        Self { status: RunStatus::Succeeded, issues: Vec::new(), error: None }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self { status: RunStatus::Failed, issues: Vec::new(), error: Some(error.into()) }
    }

    fn degraded(issues: Vec<String>) -> Self {
        Self { status: RunStatus::DegradedWithIssues, issues, error: None }
    }
}

/// The automation orchestrator.
pub struct Orchestrator {
    config: Arc<RunConfig>,
    etl: Arc<dyn EtlEngine>,
    validator: Arc<dyn QualityCheck>,
    renderer: Arc<dyn ReportRenderer>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    backups: BackupManager,
    history: Option<Mutex<RunHistoryDb>>,
    jobs: Mutex<HashMap<JobKind, JobSlot>>,
    /// Held by ETL writes and backup copies.
    db_lock: tokio::sync::Mutex<()>,
    /// Issues from the latest ETL validation, handed to the report renderer.
    last_issues: Mutex<Vec<String>>,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(config: RunConfig, components: Components) -> Self {
        Self::build(config, components, None)
    }

    /// Build with a run-history store. Each kind's schedule resumes from its
    /// last recorded completion.
    pub fn with_history(config: RunConfig, components: Components, history: RunHistoryDb) -> Self {
        Self::build(config, components, Some(history))
    }

    fn build(config: RunConfig, components: Components, history: Option<RunHistoryDb>) -> Self {
        let now = components.clock.now();
        let mut jobs = HashMap::new();
        for kind in JobKind::ALL {
            let last_finished = history.as_ref().and_then(|h| match h.last_finished(kind) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("⚠️ Could not read {kind} history: {e}");
                    None
                }
            });
            let cadence = Cadence::for_job(&config.schedule, kind);
            let schedule = JobSchedule::new(cadence, last_finished, now);
            tracing::info!("📅 {kind} job: {cadence}, next run at {}", schedule.next_fire);
            jobs.insert(kind, JobSlot { state: JobState::Idle, schedule, last_status: None });
        }

        let (shutdown, _) = watch::channel(false);
        Self {
            backups: BackupManager::from_config(&config),
            config: Arc::new(config),
            etl: components.etl,
            validator: components.validator,
            renderer: components.renderer,
            notifier: components.notifier,
            clock: components.clock,
            history: history.map(Mutex::new),
            jobs: Mutex::new(jobs),
            db_lock: tokio::sync::Mutex::new(()),
            last_issues: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<JobKind, JobSlot>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self, kind: JobKind) -> JobState {
        self.jobs().get(&kind).map(|s| s.state).unwrap_or(JobState::Idle)
    }

    pub fn status(&self) -> Vec<JobStatus> {
        let jobs = self.jobs();
        JobKind::ALL
            .iter()
            .filter_map(|kind| {
                jobs.get(kind).map(|slot| JobStatus {
                    kind: *kind,
                    state: slot.state,
                    cadence: slot.schedule.cadence,
                    next_fire: slot.schedule.next_fire,
                    last_finished: slot.schedule.last_finished,
                    last_status: slot.last_status,
                })
            })
            .collect()
    }

    pub fn next_fire(&self, kind: JobKind) -> Option<DateTime<Utc>> {
        self.jobs().get(&kind).map(|s| s.schedule.next_fire)
    }

    /// Kinds that are idle and due at `now`.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<JobKind> {
        let jobs = self.jobs();
        JobKind::ALL
            .into_iter()
            .filter(|kind| {
                jobs.get(kind)
                    .is_some_and(|s| s.state == JobState::Idle && s.schedule.is_due(now))
            })
            .collect()
    }

    // ─── Cancellation ─────────────────────────────────────────

    /// Ask every loop and in-flight cycle to stop at the next step boundary.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn checkpoint(&self) -> Result<()> {
        if self.is_shutting_down() {
            Err(SalesOpsError::Cancelled)
        } else {
            Ok(())
        }
    }

    // ─── Cycles ───────────────────────────────────────────────

    /// Run one cycle of `kind` now, regardless of schedule.
    ///
    /// Fails with `AlreadyRunning` if a cycle of the same kind is in flight,
    /// and with `Cancelled` if shutdown was requested between steps. Every
    /// other failure is reported through the returned outcome.
    pub async fn run_cycle(&self, kind: JobKind) -> Result<RunOutcome> {
        let started_at = self.clock.now();
        let _guard = self.begin(kind, started_at)?;
        tracing::info!("▶️ {kind} run started");

        let result = match kind {
            JobKind::Etl => self.etl_cycle().await,
            JobKind::Backup => self.backup_cycle().await,
            JobKind::Report => self.report_cycle().await,
        };
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::info!("⏹️ {kind} run stopped: {e}");
                return Err(e);
            }
        };

        let outcome = RunOutcome {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: result.status,
            issues: result.issues,
            error: result.error,
            started_at,
            finished_at: self.clock.now(),
        };
        self.finish(&outcome);
        Ok(outcome)
    }

    /// Move `kind` from Idle to Running, or refuse.
    fn begin(&self, kind: JobKind, started_at: DateTime<Utc>) -> Result<RunGuard<'_>> {
        let mut jobs = self.jobs();
        let slot = jobs
            .get_mut(&kind)
            .ok_or_else(|| SalesOpsError::Config(format!("no schedule for {kind}")))?;
        if let JobState::Running { .. } = slot.state {
            return Err(SalesOpsError::AlreadyRunning(kind));
        }
        slot.state = JobState::Running { started_at };
        Ok(RunGuard { orchestrator: self, kind })
    }

    fn finish(&self, outcome: &RunOutcome) {
        match outcome.status {
            RunStatus::Succeeded => tracing::info!("✅ {} run succeeded", outcome.kind),
            RunStatus::DegradedWithIssues => tracing::warn!(
                "⚠️ {} run finished with {} quality issue(s)",
                outcome.kind,
                outcome.issues.len()
            ),
            RunStatus::Failed => tracing::error!(
                "❌ {} run failed: {}",
                outcome.kind,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }

        if let Some(slot) = self.jobs().get_mut(&outcome.kind) {
            slot.schedule.record_completion(outcome.finished_at);
            slot.last_status = Some(outcome.status);
        }

        if let Some(history) = &self.history {
            let db = history.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = db.record(outcome) {
                tracing::warn!("⚠️ Failed to record {} run: {e}", outcome.kind);
            }
        }
    }

    async fn etl_cycle(&self) -> Result<CycleResult> {
        self.checkpoint()?;
        {
            // No backup may copy the file while the engine writes it.
            let _db = self.db_lock.lock().await;

            if self.config.backup_before_etl {
                if self.snapshot().await.is_err() {
                    tracing::warn!("⚠️ Continuing ETL without a pre-run snapshot");
                }
                self.checkpoint()?;
            }

            let run = bounded("ETL", self.config.timeouts.etl(), self.etl.run()).await;
            if let Err(e) = run {
                let detail = e.to_string();
                tracing::error!("❌ ETL via {} failed: {detail}", self.etl.name());
                self.notifier
                    .alert(ALERT_ETL_FAILED, &format!("ETL pipeline failed: {detail}"))
                    .await;
                return Ok(CycleResult::failed(detail));
            }
            tracing::info!("🔄 ETL via {} completed", self.etl.name());
        }

        self.checkpoint()?;
        let as_of = self.clock.local_now();
        // The validator bounds its own queries; this catches a validator that
        // ignores its budget.
        let budget = self.config.timeouts.query() + Duration::from_secs(5);
        let issues = match tokio::time::timeout(budget, self.validator.validate(as_of)).await {
            Ok(issues) => issues,
            Err(_) => {
                let detail = format!("validation timed out after {}s", budget.as_secs());
                self.notifier
                    .alert(ALERT_VALIDATION_FAILED, &format!("Data quality validation failed: {detail}"))
                    .await;
                return Ok(CycleResult::failed(detail));
            }
        };
        *self.last_issues.lock().unwrap_or_else(|e| e.into_inner()) = issues.clone();

        if issues.is_empty() {
            tracing::info!("🔍 Data quality checks passed");
            return Ok(CycleResult::succeeded());
        }

        // One consolidated alert, never one per issue.
        self.notifier
            .alert(ALERT_QUALITY_ISSUES, &quality_alert_body(&issues))
            .await;
        Ok(CycleResult::degraded(issues))
    }

    async fn backup_cycle(&self) -> Result<CycleResult> {
        self.checkpoint()?;
        let created = {
            let _db = self.db_lock.lock().await;
            self.snapshot().await
        };

        // Pruning runs whether or not the new backup succeeded.
        self.prune().await;

        Ok(match created {
            Ok(_) => CycleResult::succeeded(),
            Err(e) => CycleResult::failed(e.to_string()),
        })
    }

    async fn report_cycle(&self) -> Result<CycleResult> {
        self.checkpoint()?;
        let limit = self.config.timeouts.report();

        let report = match bounded("KPI report", limit, self.etl.generate_kpi_report()).await {
            Ok(r) => r,
            Err(e) => return Ok(self.report_failed(e).await),
        };

        self.checkpoint()?;
        let issues = self.last_issues.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let generated_at = self.clock.local_now();
        match bounded("report render", limit, self.renderer.render(&report, &issues, generated_at)).await {
            Ok(location) => {
                tracing::info!("📊 Performance report generated: {location}");
                Ok(CycleResult::succeeded())
            }
            Err(e) => Ok(self.report_failed(e).await),
        }
    }

    async fn report_failed(&self, e: SalesOpsError) -> CycleResult {
        let detail = e.to_string();
        tracing::error!("❌ Report generation failed: {detail}");
        self.notifier
            .alert(ALERT_REPORT_FAILED, &format!("Report generation failed: {detail}"))
            .await;
        CycleResult::failed(detail)
    }

    /// Take a backup; alert on failure. Caller holds `db_lock`.
    async fn snapshot(&self) -> Result<BackupRecord> {
        let backups = self.backups.clone();
        let at = self.clock.local_now();
        let copy = async move {
            match tokio::task::spawn_blocking(move || backups.create_backup(at)).await {
                Ok(created) => created,
                Err(e) => Err(SalesOpsError::Backup(format!("backup task: {e}"))),
            }
        };
        let created = bounded("backup", self.config.timeouts.backup(), copy).await;
        if let Err(e) = &created {
            tracing::error!("❌ Backup failed: {e}");
            self.notifier
                .alert(ALERT_BACKUP_FAILED, &format!("Database backup failed: {e}"))
                .await;
        }
        created
    }

    async fn prune(&self) {
        let backups = self.backups.clone();
        let now: SystemTime = self.clock.now().into();
        let task = tokio::task::spawn_blocking(move || backups.prune_old_backups(now));
        match tokio::time::timeout(self.config.timeouts.backup(), task).await {
            Ok(Ok(report)) => {
                if !report.removed.is_empty() || !report.failed.is_empty() {
                    tracing::info!(
                        "🗑️ Pruned {} old backup(s), {} could not be removed",
                        report.removed.len(),
                        report.failed.len()
                    );
                }
            }
            Ok(Err(e)) => tracing::warn!("⚠️ Prune task failed: {e}"),
            Err(_) => tracing::warn!(
                "⚠️ Pruning timed out after {}s",
                self.config.timeouts.backup_secs
            ),
        }
    }

    // ─── Scheduling ───────────────────────────────────────────

    /// Run every due job once, concurrently. Returns the outcomes of the
    /// cycles that ran.
    pub async fn tick(&self) -> Vec<RunOutcome> {
        let due = self.due_jobs(self.clock.now());
        let runs = due.into_iter().map(|kind| self.run_cycle(kind));
        futures::future::join_all(runs)
            .await
            .into_iter()
            .filter_map(|r| match r {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::debug!("tick skipped a run: {e}");
                    None
                }
            })
            .collect()
    }

    /// Run all job loops until [`Orchestrator::shutdown`] is called. Each
    /// kind gets its own task so a slow job never delays another's tick.
    pub async fn run(self: Arc<Self>) {
        tracing::info!("⏰ Scheduler started");
        let loops: Vec<_> = JobKind::ALL
            .into_iter()
            .map(|kind| tokio::spawn(self.clone().job_loop(kind)))
            .collect();
        for handle in loops {
            if let Err(e) = handle.await {
                tracing::error!("❌ Job loop crashed: {e}");
            }
        }
        tracing::info!("⏰ Scheduler stopped");
    }

    async fn job_loop(self: Arc<Self>, kind: JobKind) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let Some(next) = self.next_fire(kind) else { break };
            let wait = (next - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(MAX_SLEEP);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => continue,
            }

            if self.clock.now() < next {
                continue;
            }
            match self.run_cycle(kind).await {
                Ok(_) => {}
                Err(SalesOpsError::Cancelled) => break,
                Err(SalesOpsError::AlreadyRunning(_)) => {
                    // A manual run holds the slot; wait for it to finish.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    tracing::error!("❌ {kind} loop error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        tracing::debug!("{kind} loop exited");
    }
}

/// Resets a job slot to Idle however the cycle ends.
struct RunGuard<'a> {
    orchestrator: &'a Orchestrator,
    kind: JobKind,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.orchestrator.jobs().get_mut(&self.kind) {
            slot.state = JobState::Idle;
        }
    }
}

/// Await `fut` for at most `limit`; a timeout becomes an error.
async fn bounded<T, F>(step: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SalesOpsError::Timeout {
            step: step.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

fn quality_alert_body(issues: &[String]) -> String {
    let mut body = format!("Data quality checks found {} issue(s):\n", issues.len());
    for issue in issues {
        body.push_str("\n- ");
        body.push_str(issue);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::{NaiveDateTime, TimeZone};
    use salesops_core::config::EmailAlertsConfig;
    use salesops_core::traits::NotifyTransport;
    use salesops_core::types::KpiReport;
    use salesops_data::quality::QualityValidator;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEtl {
        runs: AtomicUsize,
        finished: AtomicUsize,
        fail: bool,
        delay: Duration,
        report_fails: bool,
    }

    impl StubEtl {
        fn ok() -> Self {
            Self {
                runs: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                fail: false,
                delay: Duration::ZERO,
                report_fails: false,
            }
        }
    }

    #[async_trait]
    impl EtlEngine for StubEtl {
        fn name(&self) -> &str {
            "stub"
        }

        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SalesOpsError::Etl("source crm unreachable".into()))
            } else {
                Ok(())
            }
        }

        async fn generate_kpi_report(&self) -> Result<KpiReport> {
            if self.report_fails {
                Err(SalesOpsError::Report("no data".into()))
            } else {
                Ok(KpiReport::default())
            }
        }
    }

    struct StubValidator {
        calls: AtomicUsize,
        issues: Vec<String>,
    }

    impl StubValidator {
        fn with(issues: Vec<String>) -> Self {
            Self { calls: AtomicUsize::new(0), issues }
        }
    }

    #[async_trait]
    impl QualityCheck for StubValidator {
        async fn validate(&self, _as_of: NaiveDateTime) -> Vec<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.issues.clone()
        }
    }

    #[derive(Default)]
    struct StubRenderer {
        rendered: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ReportRenderer for StubRenderer {
        async fn render(&self, _report: &KpiReport, issues: &[String], _at: NaiveDateTime) -> Result<String> {
            self.rendered.lock().unwrap().push(issues.to_vec());
            Ok("memory://report".into())
        }
    }

    #[derive(Default)]
    struct OkTransport {
        sends: AtomicUsize,
    }

    #[async_trait]
    impl NotifyTransport for OkTransport {
        fn name(&self) -> &str {
            "ok"
        }

        async fn send(&self, _subject: &str, _body: &str, _recipients: &[String]) -> Result<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        dir: PathBuf,
        config: RunConfig,
        clock: Arc<ManualClock>,
        transport: Arc<OkTransport>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("salesops-engine-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            let mut config = RunConfig::default();
            config.database_path = dir.join("sales.db").to_string_lossy().into_owned();
            config.backup_path = dir.join("backups").to_string_lossy().into_owned();
            config.report_path = dir.join("reports").to_string_lossy().into_owned();
            config.schedule.etl_frequency = "1h".into();
            config.schedule.backup_frequency = "1d".into();
            config.schedule.report_frequency = "7d".into();
            config.email_alerts.enabled = true;
            config.email_alerts.recipients = vec!["ops@example.com".into()];
            std::fs::write(&config.database_path, b"sqlite").unwrap();
            Self {
                dir,
                config,
                clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap())),
                transport: Arc::new(OkTransport::default()),
            }
        }

        fn components(
            &self,
            etl: Arc<dyn EtlEngine>,
            validator: Arc<dyn QualityCheck>,
            renderer: Arc<dyn ReportRenderer>,
        ) -> Components {
            let settings = EmailAlertsConfig {
                enabled: true,
                recipients: vec!["ops@example.com".into()],
                ..Default::default()
            };
            Components {
                etl,
                validator,
                renderer,
                notifier: Notifier::new(settings, Some(self.transport.clone()), Duration::from_secs(1)),
                clock: self.clock.clone(),
            }
        }

        fn orchestrator(&self, etl: Arc<dyn EtlEngine>, validator: Arc<dyn QualityCheck>) -> Orchestrator {
            let components = self.components(etl, validator, Arc::new(StubRenderer::default()));
            Orchestrator::new(self.config.clone(), components)
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn alert_titles(orchestrator: &Orchestrator) -> Vec<String> {
        orchestrator.notifier().history().into_iter().map(|n| n.title).collect()
    }

    #[tokio::test]
    async fn test_low_volume_degrades_with_one_alert() {
        let mut h = Harness::new();
        h.config.quality_thresholds.min_daily_transactions = 100;
        h.config.backup_before_etl = false;

        // Real validator over a real store holding 50 of today's transactions.
        std::fs::remove_file(&h.config.database_path).unwrap();
        let conn = rusqlite::Connection::open(&h.config.database_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE sales_transactions (transaction_date TEXT NOT NULL, total_amount REAL NOT NULL);",
        )
        .unwrap();
        let stamp = h.clock.local_now().format("%Y-%m-%d %H:%M:%S").to_string();
        for _ in 0..50 {
            conn.execute(
                "INSERT INTO sales_transactions VALUES (?1, ?2)",
                rusqlite::params![stamp, 50.0],
            )
            .unwrap();
        }
        drop(conn);

        let validator = Arc::new(QualityValidator::from_config(&h.config));
        let orchestrator = h.orchestrator(Arc::new(StubEtl::ok()), validator);

        let outcome = orchestrator.run_cycle(JobKind::Etl).await.unwrap();
        assert_eq!(outcome.status, RunStatus::DegradedWithIssues);
        assert!(outcome.success());
        assert_eq!(outcome.issues.len(), 1);
        assert!(outcome.issues[0].contains("50"));
        assert!(outcome.issues[0].contains("100"));

        assert_eq!(alert_titles(&orchestrator), vec![ALERT_QUALITY_ISSUES.to_string()]);
        assert!(orchestrator.notifier().history()[0].body.contains(&outcome.issues[0]));
        assert_eq!(h.transport.sends.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.state(JobKind::Etl), JobState::Idle);
    }

    #[tokio::test]
    async fn test_etl_failure_skips_validation() {
        let h = Harness::new();
        let etl = Arc::new(StubEtl { fail: true, ..StubEtl::ok() });
        let validator = Arc::new(StubValidator::with(vec![]));
        let orchestrator = h.orchestrator(etl, validator.clone());

        let outcome = orchestrator.run_cycle(JobKind::Etl).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(!outcome.success());
        assert!(outcome.error.as_deref().unwrap().contains("source crm unreachable"));
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);

        let history = orchestrator.notifier().history();
        let etl_alert = history.iter().find(|n| n.title == ALERT_ETL_FAILED).unwrap();
        assert!(etl_alert.body.starts_with("ETL pipeline failed: "));
    }

    #[tokio::test]
    async fn test_clean_run_sends_nothing() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(Arc::new(StubEtl::ok()), Arc::new(StubValidator::with(vec![])));
        let outcome = orchestrator.run_cycle(JobKind::Etl).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert!(alert_titles(&orchestrator).is_empty());
        // Pre-run snapshot taken.
        assert_eq!(BackupManager::from_config(&h.config).list_backups().len(), 1);
    }

    #[tokio::test]
    async fn test_backup_failure_does_not_abort_etl() {
        let h = Harness::new();
        std::fs::remove_file(&h.config.database_path).unwrap();
        let etl = Arc::new(StubEtl::ok());
        let orchestrator = h.orchestrator(etl.clone(), Arc::new(StubValidator::with(vec![])));

        let outcome = orchestrator.run_cycle(JobKind::Etl).await.unwrap();
        assert_eq!(etl.runs.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(alert_titles(&orchestrator), vec![ALERT_BACKUP_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn test_same_kind_never_overlaps() {
        let mut h = Harness::new();
        h.config.backup_before_etl = false;
        let etl = Arc::new(StubEtl { delay: Duration::from_millis(200), ..StubEtl::ok() });
        let orchestrator = Arc::new(h.orchestrator(etl.clone(), Arc::new(StubValidator::with(vec![]))));

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run_cycle(JobKind::Etl).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(orchestrator.state(JobKind::Etl), JobState::Running { .. }));

        let second = orchestrator.run_cycle(JobKind::Etl).await;
        assert!(matches!(second, Err(SalesOpsError::AlreadyRunning(JobKind::Etl))));

        // Other kinds are unaffected.
        let backup = orchestrator.run_cycle(JobKind::Backup).await.unwrap();
        assert_eq!(backup.status, RunStatus::Succeeded);

        first.await.unwrap().unwrap();
        assert_eq!(etl.runs.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.state(JobKind::Etl), JobState::Idle);
    }

    /// Rewrites the database file at the end of a slow run.
    struct WritingEtl {
        database_path: String,
        delay: Duration,
    }

    #[async_trait]
    impl EtlEngine for WritingEtl {
        fn name(&self) -> &str {
            "writer"
        }

        async fn run(&self) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            std::fs::write(&self.database_path, b"after-etl")?;
            Ok(())
        }

        async fn generate_kpi_report(&self) -> Result<KpiReport> {
            Ok(KpiReport::default())
        }
    }

    #[tokio::test]
    async fn test_etl_timeout_fails_without_validation() {
        let mut h = Harness::new();
        h.config.backup_before_etl = false;
        h.config.timeouts.etl_secs = 1;
        let etl = Arc::new(StubEtl { delay: Duration::from_secs(3), ..StubEtl::ok() });
        let validator = Arc::new(StubValidator::with(vec![]));
        let orchestrator = h.orchestrator(etl.clone(), validator.clone());

        let outcome = orchestrator.run_cycle(JobKind::Etl).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("ETL timed out after 1s"));
        assert_eq!(etl.finished.load(Ordering::SeqCst), 0);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(alert_titles(&orchestrator), vec![ALERT_ETL_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn test_backup_waits_for_etl_write() {
        let mut h = Harness::new();
        h.config.backup_before_etl = false;
        let etl = Arc::new(WritingEtl {
            database_path: h.config.database_path.clone(),
            delay: Duration::from_millis(200),
        });
        let orchestrator = Arc::new(h.orchestrator(etl, Arc::new(StubValidator::with(vec![]))));

        let load = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run_cycle(JobKind::Etl).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(orchestrator.state(JobKind::Etl), JobState::Running { .. }));

        let backup = orchestrator.run_cycle(JobKind::Backup).await.unwrap();
        assert_eq!(backup.status, RunStatus::Succeeded);

        // The copy holds the ETL's write, so it ran after the load finished.
        let copies = BackupManager::from_config(&h.config).list_backups();
        assert_eq!(copies.len(), 1);
        assert_eq!(std::fs::read(&copies[0]).unwrap(), b"after-etl");
        load.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_mid_cycle_finishes_current_step() {
        let mut h = Harness::new();
        h.config.backup_before_etl = false;
        let etl = Arc::new(StubEtl { delay: Duration::from_millis(200), ..StubEtl::ok() });
        let validator = Arc::new(StubValidator::with(vec![]));
        let orchestrator = Arc::new(h.orchestrator(etl.clone(), validator.clone()));

        let cycle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run_cycle(JobKind::Etl).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.shutdown();

        let result = cycle.await.unwrap();
        assert!(matches!(result, Err(SalesOpsError::Cancelled)));
        // The in-flight ETL step ran to completion; the next step never started.
        assert_eq!(etl.finished.load(Ordering::SeqCst), 1);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.state(JobKind::Etl), JobState::Idle);
        assert_eq!(orchestrator.next_fire(JobKind::Etl), Some(h.clock.now() + chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_backup_cycle_failure_alerts() {
        let h = Harness::new();
        std::fs::remove_file(&h.config.database_path).unwrap();
        let orchestrator = h.orchestrator(Arc::new(StubEtl::ok()), Arc::new(StubValidator::with(vec![])));
        let outcome = orchestrator.run_cycle(JobKind::Backup).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("backup failed"));
        assert_eq!(alert_titles(&orchestrator), vec![ALERT_BACKUP_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn test_report_carries_latest_issues() {
        let h = Harness::new();
        let renderer = Arc::new(StubRenderer::default());
        let issues = vec!["Data is stale: 30.0 hours old (threshold: 24h)".to_string()];
        let components = h.components(
            Arc::new(StubEtl::ok()),
            Arc::new(StubValidator::with(issues.clone())),
            renderer.clone(),
        );
        let orchestrator = Orchestrator::new(h.config.clone(), components);

        orchestrator.run_cycle(JobKind::Etl).await.unwrap();
        let outcome = orchestrator.run_cycle(JobKind::Report).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(renderer.rendered.lock().unwrap().as_slice(), &[issues]);
    }

    #[tokio::test]
    async fn test_report_failure_alerts() {
        let h = Harness::new();
        let etl = Arc::new(StubEtl { report_fails: true, ..StubEtl::ok() });
        let orchestrator = h.orchestrator(etl, Arc::new(StubValidator::with(vec![])));
        let outcome = orchestrator.run_cycle(JobKind::Report).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(alert_titles(&orchestrator), vec![ALERT_REPORT_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn test_tick_follows_schedule() {
        let mut h = Harness::new();
        h.config.backup_before_etl = false;
        let orchestrator = h.orchestrator(Arc::new(StubEtl::ok()), Arc::new(StubValidator::with(vec![])));
        let start = h.clock.now();

        assert_eq!(orchestrator.next_fire(JobKind::Etl), Some(start + chrono::Duration::hours(1)));
        assert!(orchestrator.tick().await.is_empty());

        h.clock.advance(chrono::Duration::hours(1));
        let ran = orchestrator.tick().await;
        assert_eq!(ran.len(), 1);
        assert_eq!(ran[0].kind, JobKind::Etl);
        assert_eq!(
            orchestrator.next_fire(JobKind::Etl),
            Some(start + chrono::Duration::hours(2))
        );
        assert!(orchestrator.tick().await.is_empty());
    }

    #[tokio::test]
    async fn test_single_catch_up_after_downtime() {
        let mut h = Harness::new();
        h.config.backup_before_etl = false;
        let history = RunHistoryDb::open_in_memory().unwrap();
        let now = h.clock.now();
        history
            .record(&RunOutcome {
                id: "old".into(),
                kind: JobKind::Etl,
                status: RunStatus::Succeeded,
                issues: vec![],
                error: None,
                started_at: now - chrono::Duration::hours(6),
                finished_at: now - chrono::Duration::hours(5),
            })
            .unwrap();

        let components = h.components(
            Arc::new(StubEtl::ok()),
            Arc::new(StubValidator::with(vec![])),
            Arc::new(StubRenderer::default()),
        );
        let orchestrator = Orchestrator::with_history(h.config.clone(), components, history);

        // Five intervals were missed; exactly one run is owed.
        assert_eq!(orchestrator.due_jobs(now), vec![JobKind::Etl]);
        assert_eq!(orchestrator.tick().await.len(), 1);
        assert!(orchestrator.tick().await.is_empty());
        assert_eq!(orchestrator.next_fire(JobKind::Etl), Some(now + chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_cycles_and_loops() {
        let h = Harness::new();
        let orchestrator = Arc::new(h.orchestrator(Arc::new(StubEtl::ok()), Arc::new(StubValidator::with(vec![]))));
        let handle = tokio::spawn(orchestrator.clone().run());

        orchestrator.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        assert!(matches!(
            orchestrator.run_cycle(JobKind::Etl).await,
            Err(SalesOpsError::Cancelled)
        ));
        assert_eq!(orchestrator.state(JobKind::Etl), JobState::Idle);
    }
}

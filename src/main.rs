//! # SalesOps: Sales Pipeline Automation
//!
//! Runs the ETL, backup, and report jobs on their cadences, checks data
//! quality after every load, and emails operators when something breaks.
//!
//! Usage:
//!   salesops run                      # Start the scheduler (Ctrl-C to stop)
//!   salesops once etl                 # Run one cycle now, print the outcome
//!   salesops validate                 # Run the data-quality checks only
//!   salesops backup                   # Snapshot the database and prune old copies
//!   salesops history --limit 20       # Show recent runs
//!   salesops init                     # Write the default config.json

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use salesops_core::traits::{NotifyTransport, QualityCheck};
use salesops_core::{JobKind, RunConfig, RunStatus};
use salesops_data::{BackupManager, CommandEtlEngine, HtmlReportRenderer, QualityValidator};
use salesops_scheduler::{Components, Notifier, Orchestrator, RunHistoryDb, SmtpTransport, SystemClock};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(
    name = "salesops",
    version,
    about = "📈 SalesOps: sales pipeline automation"
)]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, global = true, default_value = "config.json")]
    config: String,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and run until Ctrl-C
    Run,
    /// Run one cycle of a job now
    Once {
        /// etl, backup, or report
        kind: String,
    },
    /// Run the data-quality checks and print any issues
    Validate,
    /// Create a database backup and prune old ones
    Backup,
    /// Show recent runs
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Write the default config file if it does not exist
    Init,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn expand_config_paths(config: &mut RunConfig) {
    for path in [
        &mut config.database_path,
        &mut config.backup_path,
        &mut config.log_path,
        &mut config.report_path,
        &mut config.state_path,
    ] {
        *path = expand_path(path);
    }
}

fn log_filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        "salesops=debug,salesops_core=debug,salesops_data=debug,salesops_scheduler=debug"
    } else {
        "salesops=info,salesops_core=info,salesops_data=info,salesops_scheduler=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Load the config while a console-only subscriber is in scope. The log file
/// location comes from the config, so the full subscriber cannot exist yet.
fn load_config<W>(path: &Path, verbose: bool, writer: W) -> RunConfig
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let console = tracing_subscriber::registry().with(log_filter(verbose)).with(
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(writer),
    );
    tracing::subscriber::with_default(console, || RunConfig::load(path))
}

/// Stdout plus a daily log file. A file that cannot be opened leaves stdout
/// logging in place.
fn init_logging(log_dir: &str, verbose: bool) {
    let filter = log_filter(verbose);

    let file_name = format!("sales_automation_{}.log", chrono::Local::now().format("%Y%m%d"));
    let log_file = std::fs::create_dir_all(log_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(log_dir).join(&file_name))
    });

    let (file_layer, file_error) = match log_file {
        Ok(file) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!("⚠️ Cannot open log file in {log_dir}: {e}; logging to stdout only");
    }
}

fn build_notifier(config: &RunConfig) -> Notifier {
    let transport: Option<Arc<dyn NotifyTransport>> = if config.email_alerts.enabled {
        Some(Arc::new(SmtpTransport::new(&config.email_alerts)))
    } else {
        None
    };
    Notifier::new(config.email_alerts.clone(), transport, config.timeouts.notify())
}

fn build_orchestrator(config: RunConfig) -> Result<Orchestrator> {
    let etl = CommandEtlEngine::from_config(&config).context("ETL engine")?;
    let components = Components {
        etl: Arc::new(etl),
        validator: Arc::new(QualityValidator::from_config(&config)),
        renderer: Arc::new(HtmlReportRenderer::from_config(&config)),
        notifier: build_notifier(&config),
        clock: Arc::new(SystemClock),
    };

    match RunHistoryDb::open(Path::new(&config.state_path)) {
        Ok(history) => Ok(Orchestrator::with_history(config, components, history)),
        Err(e) => {
            tracing::warn!("⚠️ Run history unavailable ({e}); schedules start fresh");
            Ok(Orchestrator::new(config, components))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_path(&cli.config);

    if let Command::Init = cli.command {
        let path = Path::new(&config_path);
        if path.exists() {
            println!("⚠️  {} already exists, leaving it untouched.", path.display());
        } else {
            RunConfig::default()
                .save(path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("✅ Default config written to {}", path.display());
        }
        return Ok(());
    }

    let mut config = load_config(Path::new(&config_path), cli.verbose, std::io::stdout);
    expand_config_paths(&mut config);
    init_logging(&config.log_path, cli.verbose);

    match cli.command {
        Command::Run => {
            let orchestrator = Arc::new(build_orchestrator(config)?);
            if !orchestrator.notifier().enabled() {
                tracing::info!("🔕 Email alerts are disabled; failures will only be logged");
            }
            for job in orchestrator.status() {
                tracing::info!("📅 {}: every {}, next at {}", job.kind, job.cadence, job.next_fire);
            }
            let scheduler = tokio::spawn(orchestrator.clone().run());

            tokio::signal::ctrl_c().await.context("listening for Ctrl-C")?;
            tracing::info!("🛑 Shutdown requested, finishing current step");
            orchestrator.shutdown();
            scheduler.await.context("scheduler task")?;
        }
        Command::Once { kind } => {
            let kind = JobKind::parse(&kind)
                .with_context(|| format!("unknown job kind '{kind}' (expected etl, backup, or report)"))?;
            let orchestrator = build_orchestrator(config)?;
            let outcome = orchestrator.run_cycle(kind).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if outcome.status == RunStatus::Failed {
                anyhow::bail!("{kind} run failed");
            }
        }
        Command::Validate => {
            let validator = QualityValidator::from_config(&config);
            let issues = validator.validate(chrono::Local::now().naive_local()).await;
            if issues.is_empty() {
                println!("✅ All data quality checks passed");
            } else {
                println!("⚠️  {} data quality issue(s):", issues.len());
                for issue in &issues {
                    println!("   - {issue}");
                }
            }
        }
        Command::Backup => {
            let manager = BackupManager::from_config(&config);
            let record = manager.create_backup(chrono::Local::now().naive_local());
            let pruned = manager.prune_old_backups(std::time::SystemTime::now());
            for (path, e) in &pruned.failed {
                println!("⚠️  Could not remove {}: {e}", path.display());
            }
            println!("🗑️  Removed {} old backup(s)", pruned.removed.len());
            let record = record?;
            println!(
                "✅ Backup created: {} ({} bytes)",
                record.path.display(),
                record.size_bytes
            );
        }
        Command::History { limit } => {
            let history = RunHistoryDb::open(Path::new(&config.state_path))?;
            let runs = history.recent(limit)?;
            if runs.is_empty() {
                println!("No runs recorded yet.");
            }
            for run in runs {
                let detail = match (&run.error, run.issues.len()) {
                    (Some(e), _) => format!("  {e}"),
                    (None, 0) => String::new(),
                    (None, n) => format!("  {n} issue(s)"),
                };
                println!(
                    "{}  {:<6}  {:<20}{}",
                    run.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    run.kind.as_str(),
                    run.status.as_str(),
                    detail
                );
            }
        }
        Command::Init => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn scratch() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("salesops-main-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_malformed_config_is_logged() {
        let dir = scratch();
        let path = dir.join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let out = Captured::default();
        let sink = out.clone();
        let config = load_config(&path, false, move || sink.clone());

        assert_eq!(config.database_path, RunConfig::default().database_path);
        assert!(out.text().contains("Error loading config"), "{}", out.text());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_config_write_is_logged() {
        let dir = scratch();
        let path = dir.join("config.json");

        let out = Captured::default();
        let sink = out.clone();
        load_config(&path, false, move || sink.clone());

        assert!(path.exists());
        assert!(out.text().contains("Wrote default config"), "{}", out.text());
        std::fs::remove_dir_all(&dir).ok();
    }
}

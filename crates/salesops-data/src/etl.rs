//! Command-driven ETL engine.
//!
//! The ETL itself lives outside this workspace. It is invoked as a child
//! process: a zero exit status means the database was refreshed. Running the
//! same command with `report_args` must print a KPI report as JSON on stdout.

use async_trait::async_trait;
use salesops_core::config::RunConfig;
use salesops_core::error::{Result, SalesOpsError};
use salesops_core::traits::EtlEngine;
use salesops_core::types::KpiReport;
use std::process::Stdio;

/// Max bytes of stderr carried into an error message.
const STDERR_TAIL: usize = 2000;

/// Runs the external ETL program.
#[derive(Debug, Clone)]
pub struct CommandEtlEngine {
    program: String,
    args: Vec<String>,
    report_args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandEtlEngine {
    pub fn new(command: &[String], report_args: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SalesOpsError::Config("etl.command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            report_args: report_args.to_vec(),
            env: Vec::new(),
        })
    }

    /// Build from config. The engine sees the database path and every data
    /// source URL as environment variables.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let mut engine = Self::new(&config.etl.command, &config.etl.report_args)?;
        engine = engine.with_env("SALES_DATABASE_PATH", &config.database_path);
        for (key, value) in &config.data_sources {
            engine = engine.with_env(&format!("SALES_SOURCE_{}", key.to_uppercase()), value);
        }
        Ok(engine)
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    fn command(&self, extra: &[String]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .args(extra)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A caller-side timeout drops the future; the child must die with it.
            .kill_on_drop(true);
        cmd
    }

    async fn execute(&self, extra: &[String]) -> Result<Vec<u8>> {
        let output = self
            .command(extra)
            .output()
            .await
            .map_err(|e| SalesOpsError::Etl(format!("failed to start '{}': {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into());
            return Err(SalesOpsError::Etl(format!(
                "'{}' exited with {code}: {}",
                self.program,
                tail(stderr.trim(), STDERR_TAIL)
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl EtlEngine for CommandEtlEngine {
    fn name(&self) -> &str {
        &self.program
    }

    async fn run(&self) -> Result<()> {
        tracing::debug!("🔄 Running ETL: {} {:?}", self.program, self.args);
        let stdout = self.execute(&[]).await?;
        tracing::debug!("ETL wrote {} bytes of output", stdout.len());
        Ok(())
    }

    async fn generate_kpi_report(&self) -> Result<KpiReport> {
        let stdout = self.execute(&self.report_args).await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| SalesOpsError::Report(format!("invalid KPI report JSON: {e}")))
    }
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

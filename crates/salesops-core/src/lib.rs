//! # SalesOps Core
//!
//! Configuration, error taxonomy, shared types, and the collaborator traits
//! the orchestrator is wired through.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::RunConfig;
pub use error::{Result, SalesOpsError};
pub use traits::{EtlEngine, NotifyTransport, QualityCheck, ReportRenderer};
pub use types::{JobKind, KpiReport, KpiTable, RunOutcome, RunStatus};

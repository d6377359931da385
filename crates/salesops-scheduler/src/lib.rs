//! # SalesOps Scheduler
//!
//! Runs the sales-pipeline jobs on their cadences and tells operators when
//! something goes wrong.
//!
//! ## Design Principles
//! - One state machine per job kind; a kind never overlaps itself
//! - SQLite run history, so schedules resume after a restart
//! - Tokio timers only, zero overhead when idle
//! - Alerts are best-effort and never fail a run
//!
//! ## Architecture
//! ```text
//! Orchestrator (one tokio loop per job kind)
//!   ├── etl:    snapshot → ETL engine → quality checks → alert on issues
//!   ├── backup: snapshot → prune old snapshots
//!   ├── report: KPI queries → HTML report
//!   └── on failure → Notifier → SmtpTransport (lettre)
//! ```

pub mod cadence;
pub mod clock;
pub mod dispatch;
pub mod engine;
pub mod notify;
pub mod persistence;

pub use cadence::{Cadence, JobSchedule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::SmtpTransport;
pub use engine::{Components, JobState, JobStatus, Orchestrator};
pub use notify::{DeliveryStatus, Notification, Notifier};
pub use persistence::RunHistoryDb;

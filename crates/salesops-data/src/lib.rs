//! # SalesOps Data
//!
//! Everything that touches the sales database file: backups, quality checks,
//! the ETL engine process, and report rendering.

pub mod backup;
pub mod etl;
pub mod quality;
pub mod report;

pub use backup::{BackupManager, BackupRecord, PruneReport};
pub use etl::CommandEtlEngine;
pub use quality::QualityValidator;
pub use report::HtmlReportRenderer;

//! HTML rendering of KPI reports.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use salesops_core::config::RunConfig;
use salesops_core::error::{Result, SalesOpsError};
use salesops_core::traits::ReportRenderer;
use salesops_core::types::{KpiReport, KpiTable};
use std::fmt::Write as _;
use std::path::PathBuf;

const TOP_PRODUCTS_LIMIT: usize = 10;

/// Writes `sales_report_<YYYYMMDD_HHMMSS>.html` into a reports directory.
pub struct HtmlReportRenderer {
    out_dir: PathBuf,
}

impl HtmlReportRenderer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(&config.report_path)
    }

    /// Build the full HTML document.
    pub fn to_html(report: &KpiReport, issues: &[String], generated_at: NaiveDateTime) -> String {
        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <title>Sales Performance Report - {}</title>\n{STYLE}</head>\n<body>\n\
             <h1>Sales Performance Report</h1>\n<p><strong>Generated:</strong> {}</p>\n",
            generated_at.format("%Y-%m-%d"),
            generated_at.format("%Y-%m-%d %H:%M:%S"),
        );

        html.push_str("<h2>Data Quality</h2>\n");
        if issues.is_empty() {
            html.push_str("<p class=\"ok\">All quality checks passed.</p>\n");
        } else {
            html.push_str("<ul class=\"issues\">\n");
            for issue in issues {
                let _ = writeln!(html, "<li>{}</li>", escape_html(issue));
            }
            html.push_str("</ul>\n");
        }

        html.push_str("<h2>Revenue Trends</h2>\n");
        render_table(&mut html, "revenue-table", &report.revenue_trends, None);
        html.push_str("<h2>Top Products</h2>\n");
        render_table(&mut html, "products-table", &report.top_products, Some(TOP_PRODUCTS_LIMIT));
        html.push_str("<h2>Customer Segments</h2>\n");
        render_table(&mut html, "segments-table", &report.customer_segments, None);

        html.push_str("</body>\n</html>\n");
        html
    }
}

const STYLE: &str = "<style>\n\
body { font-family: Arial, sans-serif; margin: 40px; }\n\
table { border-collapse: collapse; margin-bottom: 24px; }\n\
th, td { border: 1px solid #ddd; padding: 6px 12px; text-align: left; }\n\
th { background: #f2f2f2; }\n\
.issues li { color: #b00020; }\n\
.ok { color: #2e7d32; }\n\
</style>\n";

#[async_trait]
impl ReportRenderer for HtmlReportRenderer {
    async fn render(
        &self,
        report: &KpiReport,
        issues: &[String],
        generated_at: NaiveDateTime,
    ) -> Result<String> {
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| SalesOpsError::Report(format!("create {}: {e}", self.out_dir.display())))?;

        let path = self.out_dir.join(format!(
            "sales_report_{}.html",
            generated_at.format("%Y%m%d_%H%M%S")
        ));
        let html = Self::to_html(report, issues, generated_at);
        tokio::fs::write(&path, html)
            .await
            .map_err(|e| SalesOpsError::Report(format!("write {}: {e}", path.display())))?;

        tracing::info!("📊 Report written: {}", path.display());
        Ok(path.display().to_string())
    }
}

fn render_table(html: &mut String, id: &str, table: &KpiTable, limit: Option<usize>) {
    if table.is_empty() {
        html.push_str("<p><em>No data.</em></p>\n");
        return;
    }
    let _ = writeln!(html, "<table id=\"{id}\">");
    html.push_str("<tr>");
    for col in &table.columns {
        let _ = write!(html, "<th>{}</th>", escape_html(col));
    }
    html.push_str("</tr>\n");
    for row in table.rows.iter().take(limit.unwrap_or(usize::MAX)) {
        html.push_str("<tr>");
        for cell in row {
            let _ = write!(html, "<td>{}</td>", escape_html(&cell_text(cell)));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>\n");
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.2}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

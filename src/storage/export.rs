//! Execution export to JSON or CSV files

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

use crate::models::{format_duration, Execution};

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

const CSV_HEADER: [&str; 8] = [
    "id",
    "name",
    "test_name",
    "test_type",
    "status",
    "start_time",
    "duration",
    "error",
];

/// Write executions to `path`
pub fn export_executions(executions: &[Execution], path: &Path, format: ExportFormat) -> Result<()> {
    match format {
        ExportFormat::Json => {
            let file = File::create(path).context("Failed to create export file")?;
            serde_json::to_writer_pretty(BufWriter::new(file), executions)
                .context("Failed to write executions")?;
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_path(path).context("Failed to create export file")?;
            writer.write_record(CSV_HEADER)?;
            for execution in executions {
                writer.write_record([
                    execution.id.clone(),
                    execution.name.clone(),
                    execution.test_name.clone(),
                    execution.test_type.clone(),
                    execution.status().to_string(),
                    execution
                        .start_time
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                    format_duration(execution.calculate_duration()),
                    execution.execution_result.error_message.clone(),
                ])?;
            }
            writer.flush()?;
        }
    }

    info!("Exported {} executions to {}", executions.len(), path.display());
    Ok(())
}

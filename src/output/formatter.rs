//! Output formatters for executions
//!
//! Provides table, JSON, CSV, and summary output formats.

use serde::Serialize;

use crate::metrics::MetricsSnapshot;
use crate::models::{Execution, ExecutionStatus, ExecutionsResult, ExecutionsTotals};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Execution formatter
pub struct ExecutionFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ExecutionFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn json<T: Serialize + ?Sized>(&self, value: &T) -> String {
        if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    fn status(&self, status: ExecutionStatus) -> String {
        let label = format!("{} {}", status.symbol(), status.as_str().to_uppercase());
        if !self.colorize {
            return label;
        }
        match status {
            ExecutionStatus::Success => format!("\x1b[32m{label}\x1b[0m"),
            ExecutionStatus::Error => format!("\x1b[31m{label}\x1b[0m"),
            ExecutionStatus::Running => format!("\x1b[36m{label}\x1b[0m"),
            ExecutionStatus::Queued | ExecutionStatus::Pending => format!("\x1b[33m{label}\x1b[0m"),
        }
    }

    /// Format one execution
    pub fn format_execution(&self, execution: &Execution) -> String {
        match self.format {
            OutputFormat::Table => self.format_execution_detail(execution),
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(execution),
            OutputFormat::Csv => self.format_executions_csv(std::slice::from_ref(execution)),
            OutputFormat::Summary => execution.to_string(),
        }
    }

    fn format_execution_detail(&self, execution: &Execution) -> String {
        let mut output = String::new();
        output.push_str(&format!("ID:         {}\n", execution.id));
        output.push_str(&format!("Name:       {}\n", execution.name));
        output.push_str(&format!("Test:       {}\n", execution.test_name));
        output.push_str(&format!("Type:       {}\n", execution.test_type));
        output.push_str(&format!("Status:     {}\n", self.status(execution.status())));
        output.push_str(&format!("Duration:   {}\n", execution.summary().duration));
        if !execution.params.is_empty() {
            output.push_str("Params:\n");
            for (key, value) in &execution.params {
                output.push_str(&format!("  {key}={value}\n"));
            }
        }
        let result = &execution.execution_result;
        if !result.error_message.is_empty() {
            output.push_str(&format!("Error:      {}\n", result.error_message));
        }
        if !result.output.is_empty() {
            output.push_str("Output:\n");
            for line in result.output.lines() {
                output.push_str(&format!("  {line}\n"));
            }
        }
        if !execution.step_results.is_empty() {
            output.push('\n');
            output.push_str(&self.format_step_table(execution));
        }
        output
    }

    /// Render suite steps as an aligned table
    pub fn format_step_table(&self, execution: &Execution) -> String {
        let (header, rows) = execution.step_table();
        render_table(&header, &rows)
    }

    /// Format an execution listing
    pub fn format_executions(&self, listing: &ExecutionsResult) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(listing),
            OutputFormat::Summary => format_totals(&listing.filtered),
            OutputFormat::Csv | OutputFormat::Table => {
                let header = ["ID", "Name", "Test", "Type", "Status", "Duration"];
                let rows: Vec<Vec<String>> = listing
                    .results
                    .iter()
                    .map(|s| {
                        vec![
                            s.id.clone(),
                            s.name.clone(),
                            s.test_name.clone(),
                            s.test_type.clone(),
                            s.status.to_string(),
                            s.duration.clone(),
                        ]
                    })
                    .collect();

                if self.format == OutputFormat::Csv {
                    return render_csv(&header, &rows);
                }
                let mut output = render_table(&header, &rows);
                output.push('\n');
                output.push_str(&format_totals(&listing.totals));
                output.push('\n');
                output
            }
        }
    }

    /// Format the results of one batch
    pub fn format_batch(&self, executions: &[Execution]) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(executions),
            OutputFormat::Csv => self.format_executions_csv(executions),
            OutputFormat::Summary => {
                format_totals(&ExecutionsTotals::from_executions(executions.iter()))
            }
            OutputFormat::Table => {
                let mut output = String::new();
                for execution in executions {
                    output.push_str(&format!(
                        "{:28} {:24} {}",
                        execution.test_name,
                        execution.name,
                        self.status(execution.status())
                    ));
                    if !execution.execution_result.error_message.is_empty() {
                        output.push_str(&format!(" - {}", execution.execution_result.error_message));
                    }
                    output.push('\n');
                }
                output.push_str(&format_totals(&ExecutionsTotals::from_executions(
                    executions.iter(),
                )));
                output.push('\n');
                output
            }
        }
    }

    fn format_executions_csv(&self, executions: &[Execution]) -> String {
        let header = ["id", "name", "test_name", "status", "duration", "error"];
        let rows: Vec<Vec<String>> = executions
            .iter()
            .map(|e| {
                vec![
                    e.id.clone(),
                    e.name.clone(),
                    e.test_name.clone(),
                    e.status().to_string(),
                    e.summary().duration,
                    e.execution_result.error_message.clone(),
                ]
            })
            .collect();
        render_csv(&header, &rows)
    }

    /// Format execution counters
    pub fn format_metrics(&self, snapshot: &MetricsSnapshot) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(snapshot),
            _ => {
                let header = ["Type", "Status", "Count"];
                let rows: Vec<Vec<String>> = snapshot
                    .executions
                    .iter()
                    .map(|c| vec![c.test_type.clone(), c.status.clone(), c.count.to_string()])
                    .collect();
                let mut output = render_table(&header, &rows);
                for (test_type, stats) in &snapshot.durations {
                    output.push_str(&format!("{test_type}: {}\n", stats.format_summary()));
                }
                output
            }
        }
    }
}

impl Default for ExecutionFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn format_totals(totals: &ExecutionsTotals) -> String {
    format!(
        "Total: {} | Passed: {} | Failed: {} | Running: {} | Pending: {} | Queued: {}",
        totals.results, totals.passed, totals.failed, totals.running, totals.pending, totals.queued
    )
}

/// Left aligned columns separated by two spaces
fn render_table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:width$}"))
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut output = line(header.to_vec());
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&line(rule.iter().map(String::as_str).collect()));
    for row in rows {
        output.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    output
}

fn render_csv(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let written = writer
        .write_record(header)
        .and_then(|_| rows.iter().try_for_each(|row| writer.write_record(row)));
    if written.is_err() {
        return String::new();
    }
    writer
        .into_inner()
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

//! Output formatting: JSON, YAML, table.
//!
//! Reports go to stdout in the format selected by `--output`; the colored
//! status line and warnings go to stderr so stdout stays parseable.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{Table, Tabled, settings::Style};

use tnsync_core::ChangeReport;

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Render a change report in the chosen format.
pub fn render_report(format: OutputFormat, report: &ChangeReport) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => render_json(report),
        OutputFormat::Yaml => render_yaml(report),
        OutputFormat::Table => {
            if report.diff.is_empty() {
                return Ok(String::new());
            }
            let rows: Vec<DiffRow> = report
                .diff
                .iter()
                .map(|(field, value)| DiffRow {
                    field: field.clone(),
                    value: cell(value),
                })
                .collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
    }
}

/// Render any serializable value; tables fall back to `key | value` rows
/// for objects and to JSON otherwise.
pub fn render_value(format: OutputFormat, data: &impl Serialize) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => render_json(data),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Table => {
            let value = serde_json::to_value(data).map_err(|e| CliError::Render(e.to_string()))?;
            let Value::Object(map) = value else {
                return render_json(&value);
            };
            let rows: Vec<DiffRow> = map
                .iter()
                .map(|(field, value)| DiffRow {
                    field: field.clone(),
                    value: cell(value),
                })
                .collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".into(),
        other => other.to_string(),
    }
}

fn render_json<T: Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(data).map_err(|e| CliError::Render(e.to_string()))
}

fn render_yaml<T: Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    serde_yaml::to_string(data).map_err(|e| CliError::Render(e.to_string()))
}

// ── Printing ─────────────────────────────────────────────────────────

/// Print rendered output to stdout.
pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{}", output.trim_end());
}

/// One-line summary of a report, plus its warnings, on stderr.
pub fn print_status(report: &ChangeReport, check: bool, color: bool) {
    let label = match (report.changed, check) {
        (false, _) => "ok",
        (true, false) => "changed",
        (true, true) => "would change",
    };
    let mut stderr = io::stderr().lock();
    let _ = match (color, report.changed) {
        (false, _) => writeln!(stderr, "{label}: {}", report.msg),
        (true, true) => writeln!(stderr, "{}: {}", label.yellow().bold(), report.msg),
        (true, false) => writeln!(stderr, "{}: {}", label.green().bold(), report.msg),
    };
    for warning in &report.warnings {
        let _ = if color {
            writeln!(stderr, "{}: {warning}", "warning".magenta())
        } else {
            writeln!(stderr, "warning: {warning}")
        };
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn report() -> ChangeReport {
        ChangeReport {
            changed: true,
            msg: "Updated group g1".into(),
            state: None,
            diff: [("gid".to_owned(), json!(1001))].into_iter().collect(),
            warnings: Vec::new(),
            invocations: Vec::new(),
        }
    }

    #[test]
    fn json_report_has_changed_and_msg() {
        let out = render_report(OutputFormat::Json, &report()).unwrap_or_else(|e| panic!("{e}"));
        let parsed: Value = serde_json::from_str(&out).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(parsed["changed"], true);
        assert_eq!(parsed["diff"]["gid"], 1001);
    }

    #[test]
    fn table_lists_diff_fields() {
        let out = render_report(OutputFormat::Table, &report()).unwrap_or_else(|e| panic!("{e}"));
        assert!(out.contains("gid"));
        assert!(out.contains("1001"));
    }

    #[test]
    fn empty_diff_renders_no_table() {
        let mut r = report();
        r.diff.clear();
        assert_eq!(render_report(OutputFormat::Table, &r).ok(), Some(String::new()));
    }
}

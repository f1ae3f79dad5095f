//! Output formatting for projsync (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use projsync_client::Project;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print data in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No projects");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Csv => print_csv(data),
        }
    }

    /// Print a single item in the configured format. JSON is one line per
    /// item so streams stay line-delimited.
    pub fn print_one<T: Tabled + Serialize>(&self, data: &T) {
        match self.format {
            OutputFormat::Table => println!("{}", Table::new([data])),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => print_csv(&[data]),
        }
    }
}

/// Print data as CSV
fn print_csv<T: Serialize>(data: &[T]) {
    let Some(first) = data.first() else {
        return;
    };

    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(first) {
        let headers: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        println!("{}", headers.join(","));

        for item in data {
            if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(item) {
                let values: Vec<String> = headers
                    .iter()
                    .map(|h| {
                        row.get(*h)
                            .map(|v| match v {
                                serde_json::Value::String(s) => escape_csv(s),
                                other => escape_csv(&other.to_string()),
                            })
                            .unwrap_or_default()
                    })
                    .collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// =============================================================================
// Display types
// =============================================================================

/// One project in `list` and `watch`
#[derive(Debug, Tabled, Serialize)]
pub struct ProjectRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "App")]
    pub app: String,
    #[tabled(rename = "Build")]
    pub build: String,
    #[tabled(rename = "Mode")]
    pub mode: String,
    #[tabled(rename = "Port")]
    pub port: String,
    #[tabled(rename = "Container")]
    pub container: String,
}

impl From<&Project> for ProjectRow {
    fn from(project: &Project) -> Self {
        let ports = project.ports();
        let port = match (ports.app, ports.debug) {
            (Some(app), Some(debug)) => format!("{} (debug {})", app, debug),
            (Some(app), None) => app.to_string(),
            _ => "-".to_string(),
        };
        Self {
            id: project.id().to_string(),
            name: project.name().to_string(),
            app: project.app_state().to_string(),
            build: project.build_state().to_string(),
            mode: project.start_mode().to_string(),
            port,
            container: project
                .container_id()
                .map(|c| c.chars().take(12).collect())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_escaping() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn project_row_formats_ports() {
        let snapshot = projsync_core::ProjectSnapshot::new("p1")
            .with_name("web")
            .with_app_status("started")
            .with_app_port(8080)
            .with_debug_port(9229)
            .with_container_id("0123456789abcdef");
        let (project, _) = Project::from_snapshot("local", &snapshot).unwrap();

        let row = ProjectRow::from(&project);
        assert_eq!(row.port, "8080 (debug 9229)");
        assert_eq!(row.container, "0123456789ab");
        assert_eq!(row.app, "started");
    }
}

//! Terminal output.
//!
//! Commands hand rows or single values to a [`Printer`], which renders
//! them in the selected [`OutputFormat`]. Status lines go to stdout,
//! errors to stderr.

use std::fmt::Write as _;

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use crate::config::OutputFormat;
use crate::CliResult;

/// Rows that can be printed as a bare identifier in quiet mode.
pub trait Keyed {
    /// Primary identifier of the row.
    fn key(&self) -> &str;
}

/// Renders command results in one output format.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    format: OutputFormat,
}

impl Printer {
    /// Printer for `format`.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Selected format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Prints a list of rows.
    pub fn rows<T: Tabled + Keyed + Serialize>(&self, rows: &[T]) -> CliResult<()> {
        match self.format {
            OutputFormat::Table if rows.is_empty() => info("No matching principals."),
            OutputFormat::Table => {
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
            OutputFormat::Yaml => print!("{}", to_yaml(&serde_json::to_value(rows)?)),
            OutputFormat::Quiet => rows.iter().for_each(|row| println!("{}", row.key())),
        }
        Ok(())
    }

    /// Prints one value.
    pub fn item<T: Serialize>(&self, item: &T) -> CliResult<()> {
        match self.format {
            OutputFormat::Table | OutputFormat::Yaml => {
                print!("{}", to_yaml(&serde_json::to_value(item)?));
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item)?),
            OutputFormat::Quiet => {}
        }
        Ok(())
    }
}

/// Prints a success message.
pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Prints an error message.
pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Prints an info message.
pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Prompts for a secret without echoing it.
pub fn prompt_password(prompt: &str) -> CliResult<String> {
    Ok(rpassword::prompt_password(prompt)?)
}

/// Renders a JSON value as indented YAML-style text.
#[must_use]
pub fn to_yaml(value: &Value) -> String {
    let mut out = String::new();
    write_yaml(&mut out, value, 0);
    out
}

fn write_yaml(out: &mut String, value: &Value, depth: usize) {
    let pad = "  ".repeat(depth);
    match value {
        Value::Array(items) if items.is_empty() => {
            let _ = writeln!(out, "{pad}[]");
        }
        Value::Array(items) => {
            for item in items {
                if is_scalar(item) {
                    let _ = writeln!(out, "{pad}- {}", scalar(item));
                } else {
                    let _ = writeln!(out, "{pad}-");
                    write_yaml(out, item, depth + 1);
                }
            }
        }
        Value::Object(map) => {
            for (key, val) in map {
                if is_scalar(val) {
                    let _ = writeln!(out, "{pad}{key}: {}", scalar(val));
                } else {
                    let _ = writeln!(out, "{pad}{key}:");
                    write_yaml(out, val, depth + 1);
                }
            }
        }
        scalar_value => {
            let _ = writeln!(out, "{pad}{}", scalar(scalar_value));
        }
    }
}

const fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => "~".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn yaml_nests_objects_and_lists() {
        let value = json!({
            "id": {"name": "jdoe", "domain": "example.com"},
            "groups": ["ops", "admins"],
            "alias": null,
            "locked": false
        });
        let text = to_yaml(&value);
        assert!(text.contains("id:\n  domain: example.com\n  name: jdoe\n"));
        assert!(text.contains("groups:\n  - ops\n  - admins\n"));
        assert!(text.contains("alias: ~\n"));
        assert!(text.contains("locked: false\n"));
    }

    #[test]
    fn yaml_lists_objects_as_blocks() {
        let text = to_yaml(&json!([{"name": "memberOf", "values": []}]));
        assert_eq!(text, "-\n  name: memberOf\n  values:\n    []\n");
    }
}

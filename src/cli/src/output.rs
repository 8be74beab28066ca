//! Output formatting for the wordhoard CLI.
//!
//! Table output is for people; JSON and YAML are for scripts.

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Print rows as a table, or serialize them for JSON / YAML.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No results found.".dimmed());
                return Ok(());
            }
            let table = Table::new(items)
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::left()))
                .to_string();
            println!("{}", table);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(items)?),
    }
    Ok(())
}

/// Print a single value as JSON (table mode too) or YAML.
pub fn print_item<T: Serialize>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(item)?)
        }
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(item)?),
    }
    Ok(())
}

/// One line per streamed value; JSON stays compact so each event is one line.
pub fn print_event<T: Serialize>(line: &str, item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", line),
        OutputFormat::Json => println!("{}", serde_json::to_string(item)?),
        OutputFormat::Yaml => print!("---\n{}", serde_yaml::to_string(item)?),
    }
    Ok(())
}

pub fn verdict(allowed: bool) -> ColoredString {
    if allowed {
        "ALLOW".green().bold()
    } else {
        "DENY".red().bold()
    }
}

/// Result of a mutation: whether the policy set actually changed.
pub fn print_mutation(what: &str, changed: bool, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table if changed => print_success(what),
        OutputFormat::Table => print_info(&format!("{} (already in that state)", what)),
        _ => print_item(&serde_json::json!({ "operation": what, "changed": changed }), format)?,
    }
    Ok(())
}

pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

//! Output formatting for the indexer CLI: human-readable or JSON.

use serde::Serialize;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

pub fn success(msg: impl Display) {
    println!("✓ {msg}");
}

pub fn error(msg: impl Display) {
    eprintln!("✗ {msg}");
}

pub fn kv(key: impl Display, value: impl Display) {
    println!("  {key}: {value}");
}

pub fn emit<T: Serialize>(format: OutputFormat, value: &T, human: impl FnOnce(&T)) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => error(format!("failed to render JSON output: {e}")),
        },
        OutputFormat::Human => human(value),
    }
}

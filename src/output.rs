//! Output control for quiet mode and rendering helpers
//!
//! Provides a global quiet mode flag to suppress non-essential output, plus
//! small table/CSV renderers used by the CLI. Informational output always
//! goes to stderr; stdout is reserved for program output (JSON, rows).

use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use serde_json::Value;

/// Global quiet mode flag
static QUIET_MODE: AtomicBool = AtomicBool::new(false);

/// Enable quiet mode (suppresses informational output)
pub fn set_quiet(quiet: bool) {
    QUIET_MODE.store(quiet, Ordering::SeqCst);
}

/// Check if quiet mode is enabled
pub fn is_quiet() -> bool {
    QUIET_MODE.load(Ordering::SeqCst)
}

/// Print a message to stderr only if not in quiet mode
pub fn print_info(args: std::fmt::Arguments<'_>) {
    if !is_quiet() {
        eprintln!("{}", args);
    }
}

/// Print a warning to stderr only if not in quiet mode
pub fn print_warn(args: std::fmt::Arguments<'_>) {
    if !is_quiet() {
        eprintln!("{}", format!("{}", args).yellow());
    }
}

/// Print a message only if not in quiet mode
#[macro_export]
macro_rules! info_print {
    ($($arg:tt)*) => {
        $crate::output::print_info(format_args!($($arg)*));
    };
}

/// Print to stderr only if not in quiet mode (for warnings)
#[macro_export]
macro_rules! warn_print {
    ($($arg:tt)*) => {
        $crate::output::print_warn(format_args!($($arg)*));
    };
}

/// Render a JSON value as a bare cell string (no quotes around strings).
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Print rows as an aligned plain-text table to stdout.
///
/// Columns come from the first row's key order; rows missing a key render
/// an empty cell.
pub fn print_table(rows: &[serde_json::Map<String, Value>]) {
    let Some(first) = rows.first() else {
        return;
    };
    let columns: Vec<&String> = first.keys().collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(*c).map(cell).unwrap_or_default())
                .collect()
        })
        .collect();
    for row in &rendered {
        for (i, value) in row.iter().enumerate() {
            widths[i] = widths[i].max(value.len());
        }
    }

    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
        .collect();
    println!("{}", header.join("  ").bold());

    for row in rendered {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{:<width$}", v, width = widths[i]))
            .collect();
        println!("{}", line.join("  "));
    }
}

/// Escape a CSV field per RFC 4180 (quote when needed, double inner quotes).
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Print rows as CSV (header from first row's key order) to stdout.
pub fn print_csv(rows: &[serde_json::Map<String, Value>]) {
    let Some(first) = rows.first() else {
        return;
    };
    let columns: Vec<&String> = first.keys().collect();
    let header: Vec<String> = columns.iter().map(|c| csv_escape(c)).collect();
    println!("{}", header.join(","));

    for row in rows {
        let line: Vec<String> = columns
            .iter()
            .map(|c| csv_escape(&row.get(*c).map(cell).unwrap_or_default()))
            .collect();
        println!("{}", line.join(","));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_cell_rendering() {
        assert_eq!(cell(&Value::Null), "");
        assert_eq!(cell(&Value::String("x".into())), "x");
        assert_eq!(cell(&serde_json::json!(42)), "42");
    }

    #[test]
    fn test_quiet_flag_roundtrip() {
        set_quiet(true);
        assert!(is_quiet());
        set_quiet(false);
        assert!(!is_quiet());
    }
}

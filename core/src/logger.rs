//! Record formatting for watchd consumers
//!
//! Renders change records read off the channel in multiple output formats.

use crate::event::{ChangeKind, ChangeRecord, TtyAttribution};
use chrono::DateTime;
use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable format for terminal
    #[default]
    Pretty,
    /// JSON Lines format for machine processing
    JsonLines,
    /// Compact single-line format
    Compact,
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Output format
    pub format: LogFormat,
    /// Whether to show the object's mtime
    pub show_timestamps: bool,
    /// Whether to use colors (for Pretty format)
    pub use_colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            show_timestamps: true,
            use_colors: true,
        }
    }
}

/// Terminal driver names keyed by major number, as listed in
/// `/proc/tty/drivers`
#[derive(Debug, Clone, Default)]
pub struct TtyDrivers {
    prefixes: HashMap<i32, String>,
}

impl TtyDrivers {
    /// Path of the kernel's driver table
    pub const PROC_PATH: &'static str = "/proc/tty/drivers";

    /// Read the running kernel's table; empty if it cannot be read
    pub fn load() -> Self {
        std::fs::read_to_string(Self::PROC_PATH)
            .map(|content| Self::parse(&content))
            .unwrap_or_default()
    }

    /// Parse `<name> <dev-prefix> <major> <minor-range> <type>` lines.
    /// The first line for a major wins.
    pub fn parse(content: &str) -> Self {
        let mut prefixes = HashMap::new();
        for line in content.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                continue;
            }
            if let Ok(major) = fields[2].parse::<i32>() {
                prefixes
                    .entry(major)
                    .or_insert_with(|| fields[1].to_string());
            }
        }
        Self { prefixes }
    }

    /// Device path of a terminal, e.g. `/dev/pts/3`
    pub fn name(&self, tty: &TtyAttribution) -> Option<String> {
        let prefix = self.prefixes.get(&tty.major?)?;
        Some(format!("{}/{}", prefix, tty.index?))
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    #[serde(flatten)]
    record: &'a ChangeRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    terminal: Option<String>,
}

fn format_mtime(mtime: Option<i64>) -> String {
    mtime
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".repeat(19))
}

/// Record logger
#[derive(Clone)]
pub struct Logger {
    config: LoggerConfig,
    ttys: TtyDrivers,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

impl Logger {
    /// Create a new logger with the given configuration
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            ttys: TtyDrivers::default(),
        }
    }

    /// Resolve terminal names through `ttys`
    pub fn with_tty_drivers(mut self, ttys: TtyDrivers) -> Self {
        self.ttys = ttys;
        self
    }

    /// Format a record according to the logger configuration.
    ///
    /// `path` is the reconstructed path, if the consumer has one; the
    /// record's bare name is used otherwise.
    pub fn format(&self, record: &ChangeRecord, path: Option<&Path>) -> String {
        match self.config.format {
            LogFormat::Pretty => self.format_pretty(record, path),
            LogFormat::JsonLines => self.format_json(record, path),
            LogFormat::Compact => self.format_compact(record, path),
        }
    }

    /// Log a record to the given writer
    pub fn log<W: Write>(
        &self,
        record: &ChangeRecord,
        path: Option<&Path>,
        writer: &mut W,
    ) -> io::Result<()> {
        let formatted = self.format(record, path);
        writeln!(writer, "{}", formatted)
    }

    fn display_path(record: &ChangeRecord, path: Option<&Path>) -> String {
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| record.filename.to_string_lossy())
    }

    fn terminal(&self, record: &ChangeRecord) -> String {
        if !record.tty.is_attached() {
            return "none".to_string();
        }
        self.ttys
            .name(&record.tty)
            .unwrap_or_else(|| record.tty.to_string())
    }

    fn format_pretty(&self, record: &ChangeRecord, path: Option<&Path>) -> String {
        let mut parts = Vec::new();

        if self.config.show_timestamps {
            let time = format_mtime(record.mtime);
            parts.push(if self.config.use_colors {
                time.dimmed().to_string()
            } else {
                time
            });
        }

        let kind = record.kind.to_string();
        parts.push(if self.config.use_colors {
            match record.kind {
                ChangeKind::Create => kind.green().to_string(),
                ChangeKind::Modify { .. } => kind.yellow().to_string(),
                ChangeKind::Delete => kind.red().bold().to_string(),
                ChangeKind::Rename => kind.cyan().to_string(),
            }
        } else {
            kind
        });

        parts.push(Self::display_path(record, path));
        parts.push(format!("{} -> {}", record.before_size, record.after_size));
        parts.push(format!("uid:{} gid:{}", record.uid, record.gid));
        parts.push(format!("tty:{}", self.terminal(record)));

        parts.join("  ")
    }

    fn format_json(&self, record: &ChangeRecord, path: Option<&Path>) -> String {
        let line = JsonLine {
            record,
            path: path.map(|p| p.display().to_string()),
            terminal: self.ttys.name(&record.tty),
        };
        serde_json::to_string(&line).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    fn format_compact(&self, record: &ChangeRecord, path: Option<&Path>) -> String {
        let bytes = match record.kind {
            ChangeKind::Modify { bytes } => format!(" +{}", bytes),
            _ => String::new(),
        };

        let mut line = format!(
            "[{}] {} {}->{}{}",
            record.kind.label(),
            Self::display_path(record, path),
            record.before_size,
            record.after_size,
            bytes
        );
        if self.config.show_timestamps {
            line.insert_str(0, &format!("{} ", format_mtime(record.mtime)));
        }
        line
    }
}

//! Output formatting and result sinks
//!
//! The aggregator is the only caller of a sink, so writes to one destination
//! never interleave.

use crate::error::ScanError;
use crate::scanner::{ProbeOutcome, Status};
use colored::*;
use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};
use std::path::Path;

/// Destination for reportable outcomes
pub trait ResultSink: Send {
    fn record(&mut self, outcome: &ProbeOutcome) -> crate::Result<()>;

    /// Flush buffered output once the scan is over
    fn finish(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

/// `[s] address. detail` as shown on the console
pub fn format_console_line(outcome: &ProbeOutcome) -> String {
    format!("[{}] {}. {}", outcome.status, outcome.address(), outcome.detail)
}

/// The three `;`-separated fields written to the results file
pub fn csv_fields(outcome: &ProbeOutcome) -> [String; 3] {
    [
        outcome.target.network_label().to_string(),
        outcome.address().to_string(),
        format!("[{}] {}", outcome.status, outcome.detail),
    ]
}

fn colored_marker(status: Status) -> ColoredString {
    let marker = format!("[{}]", status);
    match status {
        Status::Unknown => marker.bright_yellow(),
        Status::Vulnerable => marker.bright_green().bold(),
        Status::Backdoored => marker.bright_red().bold(),
    }
}

/// Interactive line-per-finding output
pub struct ConsoleSink<W = Stdout> {
    writer: W,
    colored: bool,
}

impl ConsoleSink<Stdout> {
    pub fn stdout(colored: bool) -> Self {
        Self::new(io::stdout(), colored)
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(writer: W, colored: bool) -> Self {
        Self { writer, colored }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ResultSink for ConsoleSink<W> {
    fn record(&mut self, outcome: &ProbeOutcome) -> crate::Result<()> {
        let line = if self.colored {
            format!(
                "{} {}. {}",
                colored_marker(outcome.status),
                outcome.address().to_string().bright_cyan(),
                outcome.detail
            )
        } else {
            format_console_line(outcome)
        };

        writeln!(self.writer, "{}", line)
            .map_err(|e| ScanError::OutputError(format!("Failed to write to console: {}", e)))
    }

    fn finish(&mut self) -> crate::Result<()> {
        self.writer
            .flush()
            .map_err(|e| ScanError::OutputError(format!("Failed to flush console: {}", e)))
    }
}

/// `label;address;[s] detail` records appended to a results file
pub struct CsvSink<W: Write = File> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    /// Open `path` for appending, creating it if needed
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                ScanError::OutputError(format!("Failed to open {}: {}", path.display(), e))
            })?;
        Ok(Self::from_writer(file))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(writer: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .from_writer(writer);
        Self { writer }
    }
}

impl<W: Write + Send> ResultSink for CsvSink<W> {
    fn record(&mut self, outcome: &ProbeOutcome) -> crate::Result<()> {
        self.writer
            .write_record(csv_fields(outcome))
            .map_err(|e| ScanError::OutputError(format!("Failed to write CSV record: {}", e)))
    }

    fn finish(&mut self) -> crate::Result<()> {
        self.writer
            .flush()
            .map_err(|e| ScanError::OutputError(format!("Failed to flush CSV output: {}", e)))
    }
}

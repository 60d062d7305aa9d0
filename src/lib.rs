//! ms17scan - concurrent MS17-010 scanner
//!
//! Probes hosts over SMBv1 on port 445 to tell whether they are vulnerable to
//! MS17-010 and whether a DoublePulsar implant already answers on them.

pub mod config;
pub mod error;
pub mod network;
pub mod output;
pub mod scanner;
pub mod utils;

// Re-export commonly used types
pub use config::{AuthFailurePolicy, ProbeConfig, ScanConfig};
pub use error::{ProbeError, ProbeStep, ScanError};
pub use output::{ConsoleSink, CsvSink, ResultSink};
pub use scanner::{HostProber, ProbeOutcome, Prober, ScanEngine, ScanSummary, Status, Target};
pub use utils::TargetSpec;

pub type Result<T> = std::result::Result<T, ScanError>;

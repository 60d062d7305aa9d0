//! Error handling for the ms17scan scanner
//!
//! Two layers of errors exist. [`ScanError`] is fatal to the whole run and is
//! only produced while the run is being prepared (configuration, target
//! parsing, output files). [`ProbeError`] belongs to a single host: it never
//! escapes the prober and is carried inside the host's outcome instead.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for run-level operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("Invalid target file {path}: line {line}: {reason}")]
    InvalidTargetLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Failed to read target file {path}: {source}")]
    InputFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Output error: {0}")]
    OutputError(String),

    #[error("No targets specified")]
    NoTargets,

    #[error("Scan task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Protocol steps of a single host probe, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeStep {
    Connect,
    Negotiate,
    SessionSetup,
    TreeConnect,
    TransactNamedPipe,
    Trans2SessionSetup,
}

impl ProbeStep {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeStep::Connect => "connect",
            ProbeStep::Negotiate => "negotiate protocol",
            ProbeStep::SessionSetup => "session setup",
            ProbeStep::TreeConnect => "tree connect",
            ProbeStep::TransactNamedPipe => "named pipe transaction",
            ProbeStep::Trans2SessionSetup => "trans2 session setup",
        }
    }
}

impl fmt::Display for ProbeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-host failure recorded in a probe outcome
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(#[source] io::Error),

    #[error("connection timed out")]
    ConnectTimeout,

    #[error("{step}: {source}")]
    Io {
        step: ProbeStep,
        #[source]
        source: io::Error,
    },

    #[error("{step}: I/O deadline exceeded")]
    Timeout { step: ProbeStep },

    #[error("{step}: response too short ({len} bytes)")]
    ShortResponse { step: ProbeStep, len: usize },

    #[error("{step}: frame of {len} bytes exceeds the session frame limit")]
    FrameTooLarge { step: ProbeStep, len: usize },

    #[error("{step}: server returned status 0x{status:08x}")]
    Status { step: ProbeStep, status: u32 },

    #[error("session setup rejected with status 0x{status:08x}")]
    AuthorizationFailed { status: u32 },

    #[error("{step}: {field} identifier was never assigned")]
    MissingIdentifier {
        step: ProbeStep,
        field: &'static str,
    },

    #[error("{template} template has no room for a patch at offset {offset}")]
    PatchOutOfRange {
        template: &'static str,
        offset: usize,
    },

    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    /// Step at which the probe stopped, if the error is tied to one
    pub fn step(&self) -> Option<ProbeStep> {
        match self {
            ProbeError::Connect(_) | ProbeError::ConnectTimeout => Some(ProbeStep::Connect),
            ProbeError::Io { step, .. }
            | ProbeError::Timeout { step }
            | ProbeError::ShortResponse { step, .. }
            | ProbeError::FrameTooLarge { step, .. }
            | ProbeError::Status { step, .. }
            | ProbeError::MissingIdentifier { step, .. } => Some(*step),
            ProbeError::AuthorizationFailed { .. } => Some(ProbeStep::SessionSetup),
            ProbeError::PatchOutOfRange { .. } | ProbeError::Cancelled => None,
        }
    }

    /// Whether the host could not be reached at all
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ProbeError::Connect(_) | ProbeError::ConnectTimeout)
    }
}

/// Result type alias for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

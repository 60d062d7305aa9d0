//! Configuration module for the ms17scan scanner

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// What to do when the server rejects the anonymous session setup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFailurePolicy {
    /// Surface the host with an explanatory detail
    #[default]
    Report,
    /// Treat the host like any other protocol failure
    Suppress,
}

/// Settings for a single host probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Destination port
    pub port: u16,

    /// Timeout for establishing the connection in milliseconds
    pub connect_timeout_ms: u64,

    /// Deadline for all reads and writes after connecting, in milliseconds
    pub io_timeout_ms: u64,

    pub auth_failure_policy: AuthFailurePolicy,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: 445,
            connect_timeout_ms: 5_000,
            io_timeout_ms: 10_000,
            auth_failure_policy: AuthFailurePolicy::Report,
        }
    }
}

impl ProbeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout_ms = connect.as_millis() as u64;
        self.io_timeout_ms = io.as_millis() as u64;
        self
    }

    pub fn with_auth_failure_policy(mut self, policy: AuthFailurePolicy) -> Self {
        self.auth_failure_policy = policy;
        self
    }
}

/// Main configuration structure for scanning operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// Capacity of the target queue feeding the workers
    pub queue_capacity: usize,

    /// Capacity of the result queue feeding the aggregator
    pub result_capacity: usize,

    /// Log every target as it is picked up
    pub verbose: bool,

    pub probe: ProbeConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 200,
            queue_capacity: 100,
            result_capacity: 16,
            verbose: false,
            probe: ProbeConfig::default(),
        }
    }
}

impl ScanConfig {
    /// Set the number of workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }

    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScanError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| ScanError::ConfigError(format!("Failed to parse TOML: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.workers == 0 {
            return Err(ScanError::ConfigError("Worker count must be greater than 0".to_string()));
        }

        if self.queue_capacity == 0 || self.result_capacity == 0 {
            return Err(ScanError::ConfigError("Queue capacities must be greater than 0".to_string()));
        }

        if self.probe.port == 0 {
            return Err(ScanError::ConfigError("Port cannot be 0".to_string()));
        }

        if self.probe.connect_timeout_ms == 0 || self.probe.io_timeout_ms == 0 {
            return Err(ScanError::ConfigError("Timeouts must be greater than 0".to_string()));
        }

        Ok(())
    }
}

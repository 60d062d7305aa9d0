//! Scanner module containing the host prober and the scan pipeline

pub mod engine;
pub mod prober;

use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

pub use engine::ScanEngine;
pub use prober::{Classification, HostProber, ProbeState, Prober};

/// A single address to probe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub address: IpAddr,

    /// Canonical CIDR the address was expanded from
    pub network: Option<String>,
}

impl Target {
    pub fn host(address: IpAddr) -> Self {
        Self {
            address,
            network: None,
        }
    }

    pub fn in_network(address: IpAddr, network: impl Into<String>) -> Self {
        Self {
            address,
            network: Some(network.into()),
        }
    }

    /// Owning network, or an empty string for a single host
    pub fn network_label(&self) -> &str {
        self.network.as_deref().unwrap_or("")
    }
}

/// Classification of a host, ordered from weakest to strongest signal
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Status {
    #[default]
    Unknown,
    Vulnerable,
    Backdoored,
}

impl Status {
    /// Single-character marker used in reports
    pub fn marker(&self) -> char {
        match self {
            Status::Unknown => '?',
            Status::Vulnerable => '+',
            Status::Backdoored => '!',
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marker())
    }
}

/// Everything learned about one target
#[derive(Debug)]
pub struct ProbeOutcome {
    pub target: Target,
    pub status: Status,

    /// Human-readable finding, empty when there is nothing to report
    pub detail: String,

    pub failure: Option<ProbeError>,

    /// Wall time spent on the host, connect included
    pub elapsed: Duration,
}

impl ProbeOutcome {
    pub fn new(target: Target, classification: Classification, failure: Option<ProbeError>) -> Self {
        Self {
            target,
            status: classification.status(),
            detail: classification.into_detail(),
            failure,
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn address(&self) -> IpAddr {
        self.target.address
    }

    /// Whether the outcome belongs in the report
    pub fn is_reportable(&self) -> bool {
        !self.detail.is_empty()
    }
}

/// Totals gathered by the aggregator over a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scanned: usize,
    pub vulnerable: usize,
    pub backdoored: usize,
    pub reported: usize,
    pub failed: usize,
    pub unreachable: usize,
}

impl ScanSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one outcome
    pub fn record(&mut self, outcome: &ProbeOutcome) {
        self.scanned += 1;
        match outcome.status {
            Status::Vulnerable => self.vulnerable += 1,
            Status::Backdoored => self.backdoored += 1,
            Status::Unknown => {}
        }
        if outcome.is_reportable() {
            self.reported += 1;
        }
        if let Some(failure) = &outcome.failure {
            if failure.is_connection_error() {
                self.unreachable += 1;
            } else {
                self.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_status_order_and_markers() {
        assert!(Status::Unknown < Status::Vulnerable);
        assert!(Status::Vulnerable < Status::Backdoored);
        assert_eq!(Status::default(), Status::Unknown);
        assert_eq!(Status::Unknown.to_string(), "?");
        assert_eq!(Status::Vulnerable.to_string(), "+");
        assert_eq!(Status::Backdoored.to_string(), "!");
    }

    #[test]
    fn test_summary_counts() {
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let mut summary = ScanSummary::new();

        let mut found = Classification::new();
        found.escalate(Status::Vulnerable, "Seems vulnerable for MS17-010.");
        summary.record(&ProbeOutcome::new(Target::host(addr), found, None));
        summary.record(&ProbeOutcome::new(
            Target::host(addr),
            Classification::new(),
            Some(ProbeError::ConnectTimeout),
        ));
        summary.record(&ProbeOutcome::new(
            Target::host(addr),
            Classification::new(),
            Some(ProbeError::Cancelled),
        ));

        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.vulnerable, 1);
        assert_eq!(summary.reported, 1);
        assert_eq!(summary.unreachable, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_target_label() {
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 1, 2));
        assert_eq!(Target::host(addr).network_label(), "");
        assert_eq!(Target::in_network(addr, "10.0.1.0/30").network_label(), "10.0.1.0/30");
    }
}

//! Target parsing and address range expansion
//!
//! A [`TargetSpec`] is either a single address or a CIDR block. Blocks are
//! expanded lazily, starting at the masked network address and incrementing
//! with carry through every octet, so even large IPv6 ranges never have to
//! be held in memory.

use crate::error::ScanError;
use crate::scanner::Target;
use ipnetwork::IpNetwork;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// One entry of the scan scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Host(IpAddr),
    /// Always stored in canonical form, host bits cleared
    Network(IpNetwork),
}

impl TargetSpec {
    /// Parse a single host address
    pub fn parse_host(input: &str) -> crate::Result<Self> {
        let input = input.trim();
        IpAddr::from_str(input)
            .map(TargetSpec::Host)
            .map_err(|_| ScanError::InvalidTarget(format!("'{}' is not an IP address", input)))
    }

    /// Parse a CIDR block such as `10.0.1.0/24`
    pub fn parse_network(input: &str) -> crate::Result<Self> {
        let input = input.trim();
        if !input.contains('/') {
            return Err(ScanError::InvalidNetwork(format!(
                "'{}' is missing a prefix length",
                input
            )));
        }

        let network = IpNetwork::from_str(input)
            .map_err(|e| ScanError::InvalidNetwork(format!("'{}': {}", input, e)))?;
        let canonical = IpNetwork::new(network.network(), network.prefix())
            .map_err(|e| ScanError::InvalidNetwork(format!("'{}': {}", input, e)))?;

        Ok(TargetSpec::Network(canonical))
    }

    /// Parse either form, preferring a plain address
    pub fn parse(input: &str) -> crate::Result<Self> {
        let input = input.trim();
        if let Ok(host) = Self::parse_host(input) {
            return Ok(host);
        }
        if input.contains('/') {
            return Self::parse_network(input);
        }
        Err(ScanError::InvalidTarget(format!(
            "'{}' is neither an IP address nor a CIDR block",
            input
        )))
    }

    /// Number of addresses this entry expands to, saturating for huge blocks
    pub fn address_count(&self) -> u128 {
        match self {
            TargetSpec::Host(_) => 1,
            TargetSpec::Network(net) => {
                let bits = match net {
                    IpNetwork::V4(_) => 32,
                    IpNetwork::V6(_) => 128,
                };
                let host_bits = bits - u32::from(net.prefix());
                1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
            }
        }
    }

    pub fn targets(&self) -> TargetIter {
        match self {
            TargetSpec::Host(addr) => TargetIter::Single(Some(Target::host(*addr))),
            TargetSpec::Network(net) => TargetIter::Network(NetworkHosts::new(*net)),
        }
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSpec::Host(addr) => write!(f, "{}", addr),
            TargetSpec::Network(net) => write!(f, "{}", net),
        }
    }
}

impl FromStr for TargetSpec {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Targets produced by one [`TargetSpec`]
#[derive(Debug, Clone)]
pub enum TargetIter {
    Single(Option<Target>),
    Network(NetworkHosts),
}

impl Iterator for TargetIter {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        match self {
            TargetIter::Single(target) => target.take(),
            TargetIter::Network(hosts) => hosts.next(),
        }
    }
}

/// Every address of a block, each labelled with the block
#[derive(Debug, Clone)]
pub struct NetworkHosts {
    network: IpNetwork,
    label: String,
    next: Option<IpAddr>,
}

impl NetworkHosts {
    pub fn new(network: IpNetwork) -> Self {
        let start = network.network();
        let label = format!("{}/{}", start, network.prefix());
        Self {
            network,
            label,
            next: Some(start),
        }
    }
}

impl Iterator for NetworkHosts {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        let current = self.next?;
        self.next = next_address(current).filter(|addr| self.network.contains(*addr));
        Some(Target::in_network(current, self.label.clone()))
    }
}

/// The address after `addr`, or `None` past the end of the address space
pub fn next_address(addr: IpAddr) -> Option<IpAddr> {
    match addr {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            increment_octets(&mut octets).then(|| IpAddr::from(octets))
        }
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            increment_octets(&mut octets).then(|| IpAddr::from(octets))
        }
    }
}

// Big-endian add-one; false when the carry falls off the top.
fn increment_octets(octets: &mut [u8]) -> bool {
    for octet in octets.iter_mut().rev() {
        let (value, carry) = octet.overflowing_add(1);
        *octet = value;
        if !carry {
            return true;
        }
    }
    false
}

/// Chain several entries into one target stream
pub fn expand(specs: Vec<TargetSpec>) -> impl Iterator<Item = Target> + Send + 'static {
    specs.into_iter().flat_map(|spec| spec.targets())
}

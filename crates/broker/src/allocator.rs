//! Node-side address allocation
//!
//! One monotonically advancing counter per node. Allocation and the apply
//! step run under the same lock, so two requests can never observe or hand
//! out the same address, and a failed apply leaves the counter untouched.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{BrokerError, Result};

/// An IPv4 address with a prefix length, e.g. `10.8.0.1/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(BrokerError::Config(format!("prefix /{} out of range", prefix)));
        }
        Ok(Self { address, prefix })
    }

    pub fn parse(value: &str) -> Result<Self> {
        let (addr, prefix) = value
            .trim()
            .split_once('/')
            .ok_or_else(|| BrokerError::Config(format!("expected address/prefix, got {:?}", value)))?;
        let address = addr
            .parse::<Ipv4Addr>()
            .map_err(|e| BrokerError::Config(format!("{}: {}", addr, e)))?;
        let prefix = prefix
            .parse::<u8>()
            .map_err(|e| BrokerError::Config(format!("{}: {}", prefix, e)))?;
        Self::new(address, prefix)
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        match self.prefix {
            0 => 0,
            p => u32::MAX << (32 - u32::from(p)),
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & self.mask())
    }

    /// Highest address in the network
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()) | !self.mask())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == u32::from(self.network())
    }
}

impl FromStr for Ipv4Cidr {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// Pushes a newly allocated peer into the running tunnel state
#[derive(Debug, Clone)]
pub enum PeerApplier {
    /// Record the assignment in the log only
    LogOnly,
    /// `wg set <interface> peer <key> allowed-ips <addr>/32` (Linux only)
    WireGuardCli { interface: String, timeout: Duration },
}

impl PeerApplier {
    pub fn wireguard(interface: impl Into<String>) -> Self {
        Self::WireGuardCli {
            interface: interface.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub async fn apply(&self, peer_key: &str, address: Ipv4Addr) -> Result<()> {
        match self {
            Self::LogOnly => {
                info!("Peer {} assigned {}", peer_key, address);
                Ok(())
            }
            Self::WireGuardCli { interface, timeout } => {
                if !cfg!(target_os = "linux") {
                    warn!("Skipping wg set for {}: not running on Linux", address);
                    return Ok(());
                }
                let allowed = format!("{}/32", address);
                let output = tokio::time::timeout(
                    *timeout,
                    Command::new("wg")
                        .args(["set", interface.as_str(), "peer", peer_key, "allowed-ips", allowed.as_str()])
                        .kill_on_drop(true)
                        .output(),
                )
                .await
                .map_err(|_| BrokerError::Apply("wg set timed out".to_string()))?
                .map_err(|e| BrokerError::Apply(e.to_string()))?;

                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    return Err(BrokerError::Apply(stderr));
                }
                info!("Added peer {} on {} with {}", peer_key, interface, allowed);
                Ok(())
            }
        }
    }
}

/// Client address pool. The CIDR's own address is the server; clients get
/// the following addresses in order, up to and including the last address
/// in the network.
pub struct AddressPool {
    cidr: Ipv4Cidr,
    next: Mutex<u64>,
    applier: PeerApplier,
}

impl AddressPool {
    pub fn new(cidr: Ipv4Cidr, applier: PeerApplier) -> Self {
        Self {
            cidr,
            next: Mutex::new(u64::from(u32::from(cidr.address())) + 1),
            applier,
        }
    }

    pub fn cidr(&self) -> Ipv4Cidr {
        self.cidr
    }

    pub fn server_address(&self) -> Ipv4Addr {
        self.cidr.address()
    }

    /// Number of client addresses the pool can hand out
    pub fn capacity(&self) -> u64 {
        u64::from(u32::from(self.cidr.broadcast())).saturating_sub(u64::from(u32::from(self.cidr.address())))
    }

    pub async fn allocated(&self) -> u64 {
        let next = *self.next.lock().await;
        next - u64::from(u32::from(self.cidr.address())) - 1
    }

    /// Take the next address, applying `peer_key` to the tunnel first when
    /// given. Exhaustion is final; the counter never moves backwards.
    pub async fn allocate(&self, peer_key: Option<&str>) -> Result<Ipv4Addr> {
        let mut next = self.next.lock().await;

        let candidate = match u32::try_from(*next) {
            Ok(raw) if self.cidr.contains(Ipv4Addr::from(raw)) => Ipv4Addr::from(raw),
            _ => {
                warn!("Address pool {} exhausted", self.cidr);
                return Err(BrokerError::PoolExhausted);
            }
        };

        if let Some(key) = peer_key {
            self.applier.apply(key, candidate).await?;
        }
        *next += 1;
        debug!("Allocated {} from {}", candidate, self.cidr);
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_cidr_parse() {
        let cidr = Ipv4Cidr::parse("10.8.0.1/24").unwrap();
        assert_eq!(cidr.address(), Ipv4Addr::new(10, 8, 0, 1));
        assert_eq!(cidr.prefix(), 24);
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 8, 0, 0));
        assert_eq!(cidr.broadcast(), Ipv4Addr::new(10, 8, 0, 255));
        assert!(cidr.contains(Ipv4Addr::new(10, 8, 0, 200)));
        assert!(!cidr.contains(Ipv4Addr::new(10, 8, 1, 0)));
        assert_eq!(cidr.to_string(), "10.8.0.1/24");

        assert!(Ipv4Cidr::parse("10.8.0.1").is_err());
        assert!(Ipv4Cidr::parse("10.8.0/24").is_err());
        assert!(Ipv4Cidr::parse("10.8.0.1/33").is_err());
    }

    #[tokio::test]
    async fn test_allocation_is_monotonic() {
        let pool = AddressPool::new(Ipv4Cidr::parse("10.8.0.1/24").unwrap(), PeerApplier::LogOnly);
        assert_eq!(pool.capacity(), 254);
        assert_eq!(pool.allocate(None).await.unwrap(), Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(pool.allocate(Some("peer")).await.unwrap(), Ipv4Addr::new(10, 8, 0, 3));
        assert_eq!(pool.allocated().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_allocation_exhausts_cleanly() {
        let pool = Arc::new(AddressPool::new(
            Ipv4Cidr::parse("10.9.0.1/28").unwrap(),
            PeerApplier::LogOnly,
        ));
        let capacity = pool.capacity();
        assert_eq!(capacity, 14);

        let mut handles = Vec::new();
        for _ in 0..capacity {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.allocate(Some("peer")).await }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let addr = handle.await.unwrap().unwrap();
            assert!(pool.cidr().contains(addr));
            assert_ne!(addr, pool.server_address());
            assert!(seen.insert(addr), "duplicate address {}", addr);
        }
        assert_eq!(seen.len() as u64, capacity);

        assert!(matches!(pool.allocate(None).await, Err(BrokerError::PoolExhausted)));
        assert!(matches!(pool.allocate(None).await, Err(BrokerError::PoolExhausted)));
    }

    #[tokio::test]
    async fn test_single_host_pool_is_empty() {
        let pool = AddressPool::new(Ipv4Cidr::parse("10.10.0.1/32").unwrap(), PeerApplier::LogOnly);
        assert_eq!(pool.capacity(), 0);
        assert!(matches!(pool.allocate(None).await, Err(BrokerError::PoolExhausted)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_apply_keeps_address() {
        let pool = AddressPool::new(
            Ipv4Cidr::parse("10.8.0.1/24").unwrap(),
            PeerApplier::WireGuardCli {
                interface: "tp-missing-iface0".to_string(),
                timeout: Duration::from_secs(2),
            },
        );

        assert!(matches!(
            pool.allocate(Some("not-a-key")).await,
            Err(BrokerError::Apply(_))
        ));
        assert_eq!(pool.allocate(None).await.unwrap(), Ipv4Addr::new(10, 8, 0, 2));
    }
}

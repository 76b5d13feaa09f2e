//! Host name resolution for machine network addresses.

#[cfg(test)]
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Forward lookup of a host name to IPv4 addresses.
///
/// Resolution is best effort: failures yield an empty list.
#[async_trait::async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup_ipv4(&self, host: &str) -> Vec<Ipv4Addr>;
}

/// Resolver backed by the system resolver through Tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait::async_trait]
impl HostResolver for DnsResolver {
    async fn lookup_ipv4(&self, host: &str) -> Vec<Ipv4Addr> {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => {
                let mut seen = Vec::new();
                for addr in addrs {
                    if let IpAddr::V4(ip) = addr.ip() {
                        if !seen.contains(&ip) {
                            seen.push(ip);
                        }
                    }
                }
                seen
            }
            Err(e) => {
                debug!("Lookup of {} failed: {}", host, e);
                Vec::new()
            }
        }
    }
}

/// Resolver answering from a fixed table; unknown hosts resolve to nothing.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: BTreeMap<String, Vec<Ipv4Addr>>,
}

#[cfg(test)]
impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_host(mut self, host: &str, addresses: Vec<Ipv4Addr>) -> Self {
        self.entries.insert(host.to_string(), addresses);
        self
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl HostResolver for StaticResolver {
    async fn lookup_ipv4(&self, host: &str) -> Vec<Ipv4Addr> {
        self.entries.get(host).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new().with_host("vm-1", vec![Ipv4Addr::new(10, 0, 0, 5)]);
        assert_eq!(resolver.lookup_ipv4("vm-1").await, vec![Ipv4Addr::new(10, 0, 0, 5)]);
        assert!(resolver.lookup_ipv4("vm-2").await.is_empty());
    }

    #[tokio::test]
    async fn test_dns_resolver_localhost_is_ipv4_only() {
        let addresses = DnsResolver.lookup_ipv4("localhost").await;
        assert!(addresses.iter().all(|ip| ip.is_loopback()));
    }
}

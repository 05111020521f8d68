use crate::types::DnsResolution;
use log::{debug, warn};
use std::net::IpAddr;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Forward/reverse DNS lookups for scanned hosts.
pub struct DnsProber {
    resolver: TokioAsyncResolver,
}

impl DnsProber {
    pub fn new() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!("Failed to read system DNS configuration: {}. Using public resolvers.", e);
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self { resolver }
    }

    /// Resolve a host. Names get a forward lookup, IP addresses a reverse
    /// lookup. `None` means the host did not resolve.
    pub async fn resolve(&self, host: &str) -> Option<DnsResolution> {
        match host.parse::<IpAddr>() {
            Ok(ip) => self.reverse(host, ip).await,
            Err(_) => self.forward(host).await,
        }
    }

    async fn forward(&self, host: &str) -> Option<DnsResolution> {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => {
                let addresses: Vec<IpAddr> = lookup.iter().collect();
                if addresses.is_empty() {
                    return None;
                }
                let fqdn = trim_root(&lookup.as_lookup().query().name().to_utf8());
                debug!("Resolved {} to {:?} ({})", host, addresses, fqdn);
                Some(DnsResolution {
                    input: host.to_string(),
                    host_name: Some(short_name(&fqdn)),
                    fqdn: Some(fqdn),
                    addresses,
                })
            }
            Err(e) => {
                debug!("Failed to resolve {}: {}", host, e);
                None
            }
        }
    }

    async fn reverse(&self, host: &str, ip: IpAddr) -> Option<DnsResolution> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(names) => {
                let fqdn = names.iter().next().map(|name| trim_root(&name.to_string()))?;
                debug!("Reverse lookup of {} returned {}", ip, fqdn);
                Some(DnsResolution {
                    input: host.to_string(),
                    host_name: Some(short_name(&fqdn)),
                    fqdn: Some(fqdn),
                    addresses: vec![ip],
                })
            }
            Err(e) => {
                debug!("No reverse DNS for {}: {}", ip, e);
                None
            }
        }
    }
}

impl Default for DnsProber {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_root(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

fn short_name(fqdn: &str) -> String {
    fqdn.split('.').next().unwrap_or(fqdn).to_string()
}

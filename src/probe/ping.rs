use log::{debug, warn};
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config as PingConfig, IcmpPacket, PingIdentifier, PingSequence};
use tokio::net::lookup_host;
use tokio::time::timeout;

const PAYLOAD: [u8; 16] = [0; 16];

/// Single ICMP echo per host, used purely as a liveness signal.
pub struct PingProber {
    client: Option<Client>,
    timeout: Duration,
}

impl PingProber {
    pub fn new(timeout: Duration) -> Self {
        let client = match Client::new(&PingConfig::default()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Failed to create ping client: {}. ICMP probes will report no reply.", e);
                None
            }
        };

        Self { client, timeout }
    }

    /// Ping `host`, preferring already resolved `addresses` over a fresh lookup.
    pub async fn ping(&self, host: &str, addresses: &[IpAddr]) -> bool {
        let Some(client) = &self.client else {
            return false;
        };

        let Some(ip) = self.target_address(host, addresses).await else {
            debug!("No IPv4 address to ping for {}", host);
            return false;
        };

        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);

        match timeout(self.timeout, pinger.ping(PingSequence(0), &PAYLOAD)).await {
            Ok(Ok((IcmpPacket::V4(_), rtt))) => {
                debug!("Host {} is alive (ICMP, {:?})", host, rtt);
                true
            }
            Ok(Ok((IcmpPacket::V6(_), _))) => false,
            Ok(Err(e)) => {
                debug!("Ping to {} failed: {}", host, e);
                false
            }
            Err(_) => {
                debug!("Ping to {} timed out", host);
                false
            }
        }
    }

    async fn target_address(&self, host: &str, addresses: &[IpAddr]) -> Option<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip).filter(IpAddr::is_ipv4);
        }
        if let Some(ip) = addresses.iter().copied().find(IpAddr::is_ipv4) {
            return Some(ip);
        }
        lookup_host((host, 0))
            .await
            .ok()?
            .map(|addr| addr.ip())
            .find(IpAddr::is_ipv4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ipv6_and_unresolvable_targets_report_no_reply() {
        let prober = PingProber::new(Duration::from_millis(200));
        assert!(!prober.ping("::1", &[]).await);
        assert!(!prober.ping("no-such-host.invalid", &[]).await);
    }
}

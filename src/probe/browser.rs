//! SQL Server Resolution Protocol (SSRP) client, the UDP protocol spoken by
//! the SQL Server Browser service.

use crate::config::Config;
use crate::types::BrowseReply;
use crate::{Result, ScanError};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout, timeout_at, Instant};

/// Broadcast request, every browser on the segment answers.
pub const CLNT_BCAST_EX: u8 = 0x02;
/// Unicast request for all instances on one host.
pub const CLNT_UCAST_EX: u8 = 0x03;
/// Unicast request for a single named instance.
pub const CLNT_UCAST_INST: u8 = 0x04;
/// First byte of every server response.
pub const SVR_RESP: u8 = 0x05;

const MAX_RESPONSE: usize = 65_535 + 3;

lazy_static! {
    static ref REPLY_RECORD: Regex = Regex::new(
        r"(?i)ServerName;(?P<server>[^;]+);InstanceName;(?P<instance>[^;]+);IsClustered;(?P<clustered>[^;]+);Version;(?P<version>[^;]+);(?P<protocols>(?:[^;]+;[^;]*(?:;|$))*?)(?:;|$)"
    )
    .unwrap();
}

/// Parse an SSRP response into instance records. `computer_name` is the host
/// the response came from. The 3-byte response header is optional.
pub fn parse_reply(data: &[u8], computer_name: &str) -> Vec<BrowseReply> {
    let body = if data.len() >= 3 && data[0] == SVR_RESP { &data[3..] } else { data };
    let text = String::from_utf8_lossy(body);

    REPLY_RECORD
        .captures_iter(&text)
        .map(|caps| {
            let mut tcp_port = None;
            let mut named_pipe = None;
            let protocols: Vec<&str> = caps["protocols"].split(';').collect();
            for pair in protocols.chunks(2) {
                match pair {
                    [key, value] if key.eq_ignore_ascii_case("tcp") => tcp_port = value.parse().ok(),
                    [key, value] if key.eq_ignore_ascii_case("np") && !value.is_empty() => {
                        named_pipe = Some(value.to_string())
                    }
                    _ => {}
                }
            }

            BrowseReply {
                machine_name: caps["server"].to_string(),
                computer_name: computer_name.to_string(),
                instance_name: caps["instance"].to_string(),
                version: caps["version"].to_string(),
                is_clustered: caps["clustered"].eq_ignore_ascii_case("yes"),
                tcp_port,
                named_pipe,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct BrowserProber {
    port: u16,
    timeout: Duration,
}

impl BrowserProber {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.scan.browser_port, config.udp_timeout())
    }

    /// Ask the browser on `host` for all of its instances. Any failure yields no replies.
    pub async fn browse(&self, host: &str) -> Vec<BrowseReply> {
        match self.try_browse(host).await {
            Ok(replies) => {
                debug!("SQL Browser on {} returned {} instance(s)", host, replies.len());
                replies
            }
            Err(e) => {
                debug!("SQL Browser probe of {} failed: {}", host, e);
                Vec::new()
            }
        }
    }

    /// Like [`BrowserProber::browse`] but surfaces socket errors and timeouts.
    pub async fn try_browse(&self, host: &str) -> Result<Vec<BrowseReply>> {
        let data = self.exchange(host, &[CLNT_UCAST_EX]).await?;
        Ok(parse_reply(&data, host))
    }

    /// Resolve a single named instance, mostly to learn its TCP port.
    pub async fn query_instance(&self, host: &str, instance: &str) -> Result<Option<BrowseReply>> {
        let mut request = Vec::with_capacity(instance.len() + 2);
        request.push(CLNT_UCAST_INST);
        request.extend_from_slice(instance.as_bytes());
        request.push(0);

        let data = self.exchange(host, &request).await?;
        Ok(parse_reply(&data, host)
            .into_iter()
            .find(|reply| reply.instance_name.eq_ignore_ascii_case(instance)))
    }

    /// Broadcast on the local segment and collect every answer until the timeout.
    pub async fn enumerate(&self) -> Result<Vec<BrowseReply>> {
        self.enumerate_via(SocketAddr::from((Ipv4Addr::BROADCAST, self.port))).await
    }

    pub async fn enumerate_via(&self, target: SocketAddr) -> Result<Vec<BrowseReply>> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
        let socket = UdpSocket::from_std(socket.into())?;

        socket.send_to(&[CLNT_BCAST_EX], target).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buffer = vec![0u8; MAX_RESPONSE];
        let mut replies = Vec::new();
        loop {
            match timeout_at(deadline, socket.recv_from(&mut buffer)).await {
                Ok(Ok((len, from))) => {
                    let found = parse_reply(&buffer[..len], &from.ip().to_string());
                    debug!("SQL Browser broadcast reply from {}: {} instance(s)", from, found.len());
                    replies.extend(found);
                }
                Ok(Err(e)) => {
                    debug!("SQL Browser broadcast receive failed: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(replies)
    }

    async fn exchange(&self, host: &str, request: &[u8]) -> Result<Vec<u8>> {
        let addr = lookup_host((host, self.port))
            .await?
            .next()
            .ok_or_else(|| ScanError::DnsResolution(format!("No address for {}", host)))?;

        let local_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local_addr).await?;
        socket.send_to(request, addr).await?;

        let mut buffer = vec![0u8; MAX_RESPONSE];
        let (len, _) = timeout(self.timeout, socket.recv_from(&mut buffer))
            .await
            .map_err(|_| ScanError::Timeout {
                operation: format!("SQL Browser query to {}", addr),
            })??;
        buffer.truncate(len);
        Ok(buffer)
    }
}

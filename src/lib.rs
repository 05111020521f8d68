//! sqlscout - SQL Server instance discovery
//!
//! This library finds SQL Server instances on a network by combining several
//! weak signals (DNS, ping, Active Directory SPNs, open TCP ports, SQL Browser
//! replies, installed services) into instance candidates with a confidence
//! level, optionally confirmed by a real SQL connection.
//!
//! # Warning
//! Only scan networks and systems you own or have explicit permission to test.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod display;
pub mod error;
pub mod platform;
pub mod probe;
pub mod reporting;
pub mod utils;

pub use error::{Result, ScanError};

/// Common types and traits used throughout the application
pub mod types {
    use bitflags::bitflags;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::net::IpAddr;
    use std::str::FromStr;

    /// Port of an unnamed (default) instance.
    pub const DEFAULT_SQL_PORT: u16 = 1433;

    /// Service instance name used by SQL Server for the default instance.
    pub const DEFAULT_INSTANCE_NAME: &str = "MSSQLSERVER";

    pub fn is_default_instance(name: &str) -> bool {
        name.eq_ignore_ascii_case(DEFAULT_INSTANCE_NAME)
    }

    /// How certain we are that a candidate is a real SQL Server instance.
    #[derive(
        Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
    )]
    pub enum Confidence {
        #[default]
        None,
        Low,
        Medium,
        High,
    }

    impl fmt::Display for Confidence {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                Confidence::None => "None",
                Confidence::Low => "Low",
                Confidence::Medium => "Medium",
                Confidence::High => "High",
            };
            f.write_str(name)
        }
    }

    impl FromStr for Confidence {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "none" => Ok(Confidence::None),
                "low" => Ok(Confidence::Low),
                "medium" => Ok(Confidence::Medium),
                "high" => Ok(Confidence::High),
                other => Err(format!("unknown confidence level: {}", other)),
            }
        }
    }

    #[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
    pub enum Availability {
        Available,
        Unavailable,
        #[default]
        Unknown,
    }

    impl fmt::Display for Availability {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    bitflags! {
        /// Probes to run against every host. Combine with `|`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct ScanType: u8 {
            const BROWSER = 0b0000_0001;
            const SQL_SERVICE = 0b0000_0010;
            const SPN = 0b0000_0100;
            const TCP_PORT = 0b0000_1000;
            const PING = 0b0001_0000;
            const SQL_CONNECT = 0b0010_0000;
            const DNS_RESOLVE = 0b0100_0000;
            const DEFAULT = Self::BROWSER.bits()
                | Self::SQL_SERVICE.bits()
                | Self::SPN.bits()
                | Self::TCP_PORT.bits()
                | Self::PING.bits()
                | Self::DNS_RESOLVE.bits();
            const ALL = Self::DEFAULT.bits() | Self::SQL_CONNECT.bits();
        }
    }

    impl Default for ScanType {
        fn default() -> Self {
            ScanType::DEFAULT
        }
    }

    bitflags! {
        /// Sources used to build the list of hosts to scan.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct DiscoveryType: u8 {
            const DOMAIN_SPN = 0b0001;
            const DATA_SOURCE_ENUMERATION = 0b0010;
            const IP_RANGE = 0b0100;
            const DOMAIN_SERVER = 0b1000;
            const ALL = Self::DOMAIN_SPN.bits()
                | Self::DATA_SOURCE_ENUMERATION.bits()
                | Self::IP_RANGE.bits()
                | Self::DOMAIN_SERVER.bits();
        }
    }

    /// Forward or reverse DNS record for a scanned host.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct DnsResolution {
        pub input: String,
        pub host_name: Option<String>,
        pub fqdn: Option<String>,
        pub addresses: Vec<IpAddr>,
    }

    impl DnsResolution {
        pub fn is_resolved(&self) -> bool {
            !self.addresses.is_empty() || self.fqdn.is_some()
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    pub struct PortResult {
        pub port: u16,
        pub is_open: bool,
    }

    /// One instance record out of an SSRP reply.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct BrowseReply {
        pub machine_name: String,
        pub computer_name: String,
        pub instance_name: String,
        pub version: String,
        pub is_clustered: bool,
        pub tcp_port: Option<u16>,
        pub named_pipe: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub enum SpnSuffix {
        Port(u16),
        Instance(String),
        None,
    }

    /// A parsed `MSSQLSvc/host[:port|:instance]` service principal name.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct Spn {
        pub raw: String,
        pub host: String,
        pub suffix: SpnSuffix,
    }

    impl Spn {
        pub const SERVICE_CLASS: &'static str = "MSSQLSvc";

        /// Parse an SPN string. Returns `None` for anything that is not an
        /// `MSSQLSvc` principal.
        pub fn parse(raw: &str) -> Option<Spn> {
            let raw = raw.trim();
            let (class, rest) = raw.split_once('/')?;
            if !class.eq_ignore_ascii_case(Self::SERVICE_CLASS) || rest.is_empty() {
                return None;
            }
            let (host, suffix) = match rest.split_once(':') {
                // Numeric suffixes are ports; out-of-range ones are dropped.
                Some((host, suffix)) if suffix.bytes().all(|b| b.is_ascii_digit()) && !suffix.is_empty() => {
                    match suffix.parse::<u16>() {
                        Ok(port) if port != 0 => (host, SpnSuffix::Port(port)),
                        _ => (host, SpnSuffix::None),
                    }
                }
                Some((host, suffix)) if !suffix.is_empty() => (host, SpnSuffix::Instance(suffix.to_string())),
                Some((host, _)) => (host, SpnSuffix::None),
                None => (rest, SpnSuffix::None),
            };
            if host.is_empty() {
                return None;
            }
            Some(Spn {
                raw: raw.to_string(),
                host: host.to_string(),
                suffix,
            })
        }

        pub fn port(&self) -> Option<u16> {
            match self.suffix {
                SpnSuffix::Port(port) => Some(port),
                _ => None,
            }
        }

        pub fn instance(&self) -> Option<&str> {
            match &self.suffix {
                SpnSuffix::Instance(name) => Some(name),
                _ => None,
            }
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    pub enum SqlServiceType {
        Engine,
        Agent,
        Browser,
        FullText,
        Ssis,
        Ssrs,
        Ssas,
        PolyBase,
        Other,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub enum ServiceState {
        Running,
        Stopped,
        Other(String),
    }

    /// An installed SQL Server related service on a host.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct ServiceRecord {
        pub computer_name: String,
        pub display_name: String,
        pub instance_name: Option<String>,
        pub service_type: SqlServiceType,
        pub state: ServiceState,
    }

    /// Everything the probes found out about one host.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct HostEvidence {
        pub computer_name: String,
        pub dns: Option<DnsResolution>,
        pub ping: bool,
        pub spns: Vec<Spn>,
        pub ports: Vec<PortResult>,
        pub browse_replies: Vec<BrowseReply>,
        pub services: Vec<ServiceRecord>,
    }

    impl HostEvidence {
        pub fn new(computer_name: &str) -> Self {
            Self {
                computer_name: computer_name.to_string(),
                ..Default::default()
            }
        }

        pub fn is_port_open(&self, port: u16) -> bool {
            self.ports.iter().any(|p| p.port == port && p.is_open)
        }

        pub fn is_alive(&self) -> bool {
            self.ping || self.dns.as_ref().is_some_and(DnsResolution::is_resolved)
        }
    }

    /// A provisional SQL Server instance discovered on a host.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct InstanceCandidate {
        pub machine_name: String,
        pub computer_name: String,
        pub instance_name: Option<String>,
        pub port: Option<u16>,
        pub dns_resolution: Option<DnsResolution>,
        pub ping: bool,
        pub scan_types: ScanType,
        pub services: Vec<ServiceRecord>,
        pub system_services: Vec<ServiceRecord>,
        pub spns: Vec<String>,
        pub browse_reply: Option<BrowseReply>,
        pub ports_scanned: Vec<PortResult>,
        pub confidence: Confidence,
        pub availability: Availability,
        pub tcp_connected: bool,
        pub sql_connected: bool,
        pub timestamp: DateTime<Utc>,
    }

    impl InstanceCandidate {
        pub fn new(computer_name: &str, scan_types: ScanType) -> Self {
            Self {
                machine_name: computer_name.to_string(),
                computer_name: computer_name.to_string(),
                instance_name: None,
                port: None,
                dns_resolution: None,
                ping: false,
                scan_types,
                services: Vec::new(),
                system_services: Vec::new(),
                spns: Vec::new(),
                browse_reply: None,
                ports_scanned: Vec::new(),
                confidence: Confidence::None,
                availability: Availability::Unknown,
                tcp_connected: false,
                sql_connected: false,
                timestamp: Utc::now(),
            }
        }

        /// Connection string form of the instance: `HOST\NAME`, `HOST,PORT` or `HOST`.
        pub fn sql_instance(&self) -> String {
            match (&self.instance_name, self.port) {
                (Some(name), _) if !is_default_instance(name) => {
                    format!("{}\\{}", self.computer_name, name)
                }
                (_, Some(port)) if port != DEFAULT_SQL_PORT => {
                    format!("{},{}", self.computer_name, port)
                }
                _ => self.computer_name.clone(),
            }
        }

        /// Identity of the candidate within one scan: host plus instance or port.
        pub fn key(&self) -> (String, String) {
            let identity = match (&self.instance_name, self.port) {
                (Some(name), _) => format!("instance:{}", name.to_ascii_uppercase()),
                (None, Some(port)) => format!("port:{}", port),
                (None, None) => String::new(),
            };
            (self.computer_name.to_ascii_lowercase(), identity)
        }
    }

    /// Username and password pair. The password never shows up in `Debug` output.
    #[derive(Clone, PartialEq, Eq)]
    pub struct Credential {
        pub username: String,
        pub password: String,
    }

    impl Credential {
        pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
            Self {
                username: username.into(),
                password: password.into(),
            }
        }
    }

    impl fmt::Debug for Credential {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Credential")
                .field("username", &self.username)
                .field("password", &"********")
                .finish()
        }
    }

}

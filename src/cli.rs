use crate::config::Config;
use crate::discovery::DiscoveryRequest;
use crate::reporting::OutputFormat;
use crate::types::{Confidence, Credential, DiscoveryType, ScanType};
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sqlscout")]
#[command(about = "Find SQL Server instances on the network and rate how sure we are about each")]
#[command(long_about = r#"
sqlscout finds SQL Server instances by combining DNS, ping, Active Directory
SPNs, TCP ports, SQL Browser (UDP 1434) replies and installed services into
instance candidates with a confidence level.

WARNING: Only scan networks and systems you own or have explicit permission
to test.

Examples:
  sqlscout --computer-name sql1,sql2                # scan known hosts
  sqlscout --discovery-type domain-spn -d dc01      # hosts with MSSQLSvc SPNs
  sqlscout --discovery-type ip-range --ip-address 10.1.1.0/24
  sqlscout --discovery-type all --scan-type all --sql-user sa
  sqlscout -C sql1 --minimum-confidence none --format json
"#)]
#[command(version)]
pub struct Cli {
    /// Hosts to scan (names or IP addresses)
    #[arg(short = 'C', long = "computer-name", value_name = "HOST", value_delimiter = ',',
          conflicts_with = "discovery_type")]
    pub computer_names: Vec<String>,

    /// Sources used to find hosts
    #[arg(long, value_enum, value_delimiter = ',')]
    pub discovery_type: Vec<DiscoveryTypeArg>,

    /// Probes to run on every host [default: default]
    #[arg(short = 't', long, value_enum, value_delimiter = ',')]
    pub scan_type: Vec<ScanTypeArg>,

    /// Drop candidates below this level (none, low, medium, high)
    #[arg(short = 'm', long, value_name = "LEVEL")]
    pub minimum_confidence: Option<Confidence>,

    /// TCP ports to test on every host
    #[arg(short = 'p', long = "tcp-port", value_name = "PORT", value_delimiter = ',')]
    pub tcp_ports: Vec<u16>,

    /// IP ranges for ip-range discovery: a.b.c.d, a.b.c.d-e.f.g.h, a.b.c.d/mask or a.b.c.d/n
    #[arg(long = "ip-address", value_name = "RANGE", value_delimiter = ',')]
    pub ip_ranges: Vec<String>,

    /// Domain controller for SPN and server lookups
    #[arg(short = 'd', long)]
    pub domain_controller: Option<String>,

    /// Directory (Windows) account
    #[arg(long, env = "SQLSCOUT_LDAP_USER")]
    pub ldap_user: Option<String>,

    #[arg(long, env = "SQLSCOUT_LDAP_PASSWORD", hide_env_values = true)]
    pub ldap_password: Option<String>,

    /// SQL login used by the sql-connect probe
    #[arg(long, env = "SQLSCOUT_SQL_USER")]
    pub sql_user: Option<String>,

    #[arg(long, env = "SQLSCOUT_SQL_PASSWORD", hide_env_values = true)]
    pub sql_password: Option<String>,

    /// TCP connect timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub tcp_timeout: Option<u64>,

    /// SQL Browser receive timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub udp_timeout: Option<u64>,

    /// SQL connect timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub sql_timeout: Option<u64>,

    /// Directory bind and search timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub ldap_timeout: Option<u64>,

    /// Service inventory file (TOML or JSON)
    #[arg(long, value_name = "FILE")]
    pub service_inventory: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the effective configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    pub save_config: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (records and errors only)
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiscoveryTypeArg {
    DomainSpn,
    DataSourceEnumeration,
    IpRange,
    DomainServer,
    All,
}

impl From<DiscoveryTypeArg> for DiscoveryType {
    fn from(arg: DiscoveryTypeArg) -> Self {
        match arg {
            DiscoveryTypeArg::DomainSpn => DiscoveryType::DOMAIN_SPN,
            DiscoveryTypeArg::DataSourceEnumeration => DiscoveryType::DATA_SOURCE_ENUMERATION,
            DiscoveryTypeArg::IpRange => DiscoveryType::IP_RANGE,
            DiscoveryTypeArg::DomainServer => DiscoveryType::DOMAIN_SERVER,
            DiscoveryTypeArg::All => DiscoveryType::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScanTypeArg {
    Browser,
    SqlService,
    Spn,
    TcpPort,
    Ping,
    SqlConnect,
    DnsResolve,
    Default,
    All,
}

impl From<ScanTypeArg> for ScanType {
    fn from(arg: ScanTypeArg) -> Self {
        match arg {
            ScanTypeArg::Browser => ScanType::BROWSER,
            ScanTypeArg::SqlService => ScanType::SQL_SERVICE,
            ScanTypeArg::Spn => ScanType::SPN,
            ScanTypeArg::TcpPort => ScanType::TCP_PORT,
            ScanTypeArg::Ping => ScanType::PING,
            ScanTypeArg::SqlConnect => ScanType::SQL_CONNECT,
            ScanTypeArg::DnsResolve => ScanType::DNS_RESOLVE,
            ScanTypeArg::Default => ScanType::DEFAULT,
            ScanTypeArg::All => ScanType::ALL,
        }
    }
}

impl Cli {
    pub fn discovery_types(&self) -> DiscoveryType {
        self.discovery_type
            .iter()
            .fold(DiscoveryType::empty(), |acc, arg| acc | DiscoveryType::from(*arg))
    }

    /// `None` when no scan type was given on the command line.
    pub fn scan_types(&self) -> Option<ScanType> {
        if self.scan_type.is_empty() {
            return None;
        }
        Some(
            self.scan_type
                .iter()
                .fold(ScanType::empty(), |acc, arg| acc | ScanType::from(*arg)),
        )
    }

    pub fn ldap_credential(&self) -> Option<Credential> {
        credential(&self.ldap_user, &self.ldap_password)
    }

    pub fn sql_credential(&self) -> Option<Credential> {
        credential(&self.sql_user, &self.sql_password)
    }

    /// Fold command line overrides into the loaded configuration.
    pub fn apply_to(&self, config: &mut Config) {
        if !self.tcp_ports.is_empty() {
            config.scan.tcp_ports = self.tcp_ports.clone();
        }
        if let Some(ms) = self.tcp_timeout {
            config.scan.tcp_connect_timeout = ms;
        }
        if let Some(ms) = self.udp_timeout {
            config.scan.udp_timeout = ms;
        }
        if let Some(secs) = self.sql_timeout {
            config.scan.sql_connect_timeout = secs;
        }
        if let Some(secs) = self.ldap_timeout {
            config.discovery.ldap_timeout = secs;
        }
        if let Some(scan_types) = self.scan_types() {
            config.scan.scan_types = scan_types;
        }
        if let Some(level) = self.minimum_confidence {
            config.scan.minimum_confidence = level;
        }
        if let Some(dc) = &self.domain_controller {
            config.discovery.domain_controller = Some(dc.clone());
        }
        if let Some(path) = &self.service_inventory {
            config.services.inventory = Some(path.clone());
        }
    }

    /// Build the discovery request from the command line and an effective configuration.
    pub fn to_request(&self, config: &Config) -> DiscoveryRequest {
        let discovery_type = self.discovery_types();
        let ip_ranges = if self.ip_ranges.is_empty() && discovery_type.contains(DiscoveryType::IP_RANGE) {
            config.discovery.ip_ranges.clone()
        } else {
            self.ip_ranges.clone()
        };

        DiscoveryRequest {
            computer_names: self.computer_names.clone(),
            discovery_type,
            scan_types: config.scan.scan_types,
            minimum_confidence: config.scan.minimum_confidence,
            tcp_ports: config.scan.tcp_ports.clone(),
            ip_ranges,
            domain_controller: config.discovery.domain_controller.clone(),
            credential: self.ldap_credential(),
            sql_credential: self.sql_credential(),
        }
    }
}

fn credential(user: &Option<String>, password: &Option<String>) -> Option<Credential> {
    user.as_ref()
        .map(|user| Credential::new(user.clone(), password.clone().unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_lists_combine() {
        let cli = Cli::try_parse_from([
            "sqlscout",
            "--discovery-type",
            "domain-spn,ip-range",
            "--scan-type",
            "browser,tcp-port",
            "--scan-type",
            "sql-connect",
            "--ip-address",
            "10.1.1.0/30",
        ])
        .unwrap();

        assert_eq!(cli.discovery_types(), DiscoveryType::DOMAIN_SPN | DiscoveryType::IP_RANGE);
        assert_eq!(
            cli.scan_types(),
            Some(ScanType::BROWSER | ScanType::TCP_PORT | ScanType::SQL_CONNECT)
        );
        assert_eq!(cli.ip_ranges, vec!["10.1.1.0/30"]);
    }

    #[test]
    fn hosts_and_discovery_conflict() {
        assert!(Cli::try_parse_from(["sqlscout", "-C", "sql1", "--discovery-type", "all"]).is_err());
    }

    #[test]
    fn overrides_and_request() {
        let cli = Cli::try_parse_from([
            "sqlscout",
            "-C",
            "sql1,sql2",
            "-p",
            "1433,5555",
            "-m",
            "medium",
            "--udp-timeout",
            "500",
            "--ldap-timeout",
            "20",
            "--sql-user",
            "scout",
            "--sql-password",
            "s3cret",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_to(&mut config);
        assert_eq!(config.scan.udp_timeout, 500);
        assert_eq!(config.discovery.ldap_timeout, 20);
        assert_eq!(config.scan.scan_types, ScanType::DEFAULT);

        let request = cli.to_request(&config);
        assert_eq!(request.computer_names, vec!["sql1", "sql2"]);
        assert_eq!(request.tcp_ports, vec![1433, 5555]);
        assert_eq!(request.minimum_confidence, Confidence::Medium);
        assert_eq!(request.sql_credential, Some(Credential::new("scout", "s3cret")));
        assert!(request.validate().is_ok());
    }
}

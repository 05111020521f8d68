use crate::types::{Confidence, ScanType, DEFAULT_SQL_PORT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// UDP port the SQL Server Browser listens on.
pub const BROWSER_PORT: u16 = 1434;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub discovery: DiscoveryConfig,
    pub services: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub tcp_ports: Vec<u16>,
    pub tcp_connect_timeout: u64, // milliseconds
    pub udp_timeout: u64,         // milliseconds
    pub ping_timeout: u64,        // milliseconds
    pub sql_connect_timeout: u64, // seconds
    pub browser_port: u16,
    pub scan_types: ScanType,
    pub minimum_confidence: Confidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Domain controller (or AD domain name) used for directory searches.
    pub domain_controller: Option<String>,
    pub ldap_port: Option<u16>,
    pub use_ldaps: bool,
    pub ldap_timeout: u64, // seconds
    /// Ranges scanned when IP range discovery runs without explicit ranges.
    pub ip_ranges: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// TOML or JSON file mapping host names to installed SQL services.
    pub inventory: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tcp_ports: vec![DEFAULT_SQL_PORT],
            tcp_connect_timeout: 3000,
            udp_timeout: 2000,
            ping_timeout: 1000,
            sql_connect_timeout: 15,
            browser_port: BROWSER_PORT,
            scan_types: ScanType::DEFAULT,
            minimum_confidence: Confidence::Low,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            domain_controller: None,
            ldap_port: None,
            use_ldaps: false,
            ldap_timeout: 10,
            ip_ranges: Vec::new(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn save_to_file(&self, path: &str) -> crate::Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| crate::ScanError::SystemError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn tcp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.scan.tcp_connect_timeout)
    }

    pub fn udp_timeout(&self) -> Duration {
        Duration::from_millis(self.scan.udp_timeout)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.scan.ping_timeout)
    }

    pub fn sql_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.sql_connect_timeout)
    }

    pub fn ldap_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.ldap_timeout)
    }
}

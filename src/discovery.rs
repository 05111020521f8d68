use crate::aggregate::{aggregate, retain_confident};
use crate::config::Config;
use crate::platform;
use crate::probe::{
    tcp, BrowserProber, DirectorySearcher, DnsProber, LdapDirectory, PingProber, ServiceEnumerator,
    ServiceInventory, SqlProbeOutcome, SqlTarget, SqlValidator, TiberiusValidator,
};
use crate::types::{
    Confidence, Credential, DiscoveryType, DnsResolution, HostEvidence, InstanceCandidate, ScanType, Spn,
    DEFAULT_SQL_PORT,
};
use crate::utils::network::{normalize_host, IpRange};
use crate::{Result, ScanError};
use chrono::Utc;
use futures::future;
use futures::stream::{self, LocalBoxStream, StreamExt};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::net::IpAddr;

/// Sources in the order they run.
const SOURCE_ORDER: [DiscoveryType; 4] = [
    DiscoveryType::DOMAIN_SPN,
    DiscoveryType::DATA_SOURCE_ENUMERATION,
    DiscoveryType::IP_RANGE,
    DiscoveryType::DOMAIN_SERVER,
];

/// What to scan and how. Either `computer_names` or `discovery_type` is set, never both.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub computer_names: Vec<String>,
    pub discovery_type: DiscoveryType,
    pub scan_types: ScanType,
    pub minimum_confidence: Confidence,
    pub tcp_ports: Vec<u16>,
    pub ip_ranges: Vec<String>,
    pub domain_controller: Option<String>,
    pub credential: Option<Credential>,
    pub sql_credential: Option<Credential>,
}

impl Default for DiscoveryRequest {
    fn default() -> Self {
        Self {
            computer_names: Vec::new(),
            discovery_type: DiscoveryType::empty(),
            scan_types: ScanType::DEFAULT,
            minimum_confidence: Confidence::Low,
            tcp_ports: vec![DEFAULT_SQL_PORT],
            ip_ranges: Vec::new(),
            domain_controller: None,
            credential: None,
            sql_credential: None,
        }
    }
}

impl DiscoveryRequest {
    pub fn for_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            computer_names: hosts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn for_discovery(discovery_type: DiscoveryType) -> Self {
        Self {
            discovery_type,
            ..Default::default()
        }
    }

    /// Check the request and parse its IP ranges. Nothing is scanned before this passes.
    pub fn validate(&self) -> Result<Vec<IpRange>> {
        let has_hosts = !self.computer_names.is_empty();
        let has_discovery = !self.discovery_type.is_empty();
        if has_hosts && has_discovery {
            return Err(ScanError::InvalidInput(
                "Explicit computer names cannot be combined with a discovery type".to_string(),
            ));
        }
        if !has_hosts && !has_discovery {
            return Err(ScanError::InvalidInput(
                "Either computer names or a discovery type is required".to_string(),
            ));
        }

        if self.tcp_ports.contains(&0) {
            return Err(ScanError::InvalidInput("TCP port 0 is not a valid port".to_string()));
        }

        if !self.ip_ranges.is_empty() && !self.discovery_type.contains(DiscoveryType::IP_RANGE) {
            return Err(ScanError::InvalidInput(
                "IP address ranges require the IpRange discovery type".to_string(),
            ));
        }
        self.ip_ranges.iter().map(|spec| IpRange::parse(spec)).collect()
    }
}

/// Runs discovery sources and the per-host pipeline.
pub struct InstanceFinder {
    config: Config,
    request: DiscoveryRequest,
    ip_ranges: Vec<IpRange>,
    dns: DnsProber,
    ping: Option<PingProber>,
    browser: BrowserProber,
    directory: Option<Box<dyn DirectorySearcher>>,
    services: Box<dyn ServiceEnumerator>,
    sql: Box<dyn SqlValidator>,
}

impl InstanceFinder {
    pub fn new(config: Config, request: DiscoveryRequest) -> Result<Self> {
        let ip_ranges = request.validate()?;

        let ping = request
            .scan_types
            .contains(ScanType::PING)
            .then(|| PingProber::new(config.ping_timeout()));
        let browser = BrowserProber::from_config(&config);

        let domain_controller = request
            .domain_controller
            .clone()
            .or_else(|| config.discovery.domain_controller.clone())
            .or_else(|| std::env::var("USERDNSDOMAIN").ok().filter(|d| !d.is_empty()));
        let directory = domain_controller.map(|server| {
            debug!("Using directory server {}", server);
            Box::new(
                LdapDirectory::new(server, request.credential.clone())
                    .with_port(config.discovery.ldap_port)
                    .with_ldaps(config.discovery.use_ldaps)
                    .with_timeout(config.ldap_timeout()),
            ) as Box<dyn DirectorySearcher>
        });

        let services = match &config.services.inventory {
            Some(path) => ServiceInventory::load(path)?,
            None => ServiceInventory::empty(),
        };

        let sql = TiberiusValidator::new(
            request.sql_credential.clone(),
            config.sql_connect_timeout(),
            browser.clone(),
        );

        Ok(Self {
            config,
            request,
            ip_ranges,
            dns: DnsProber::new(),
            ping,
            browser,
            directory,
            services: Box::new(services),
            sql: Box::new(sql),
        })
    }

    pub fn with_directory(mut self, directory: Box<dyn DirectorySearcher>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_service_enumerator(mut self, services: Box<dyn ServiceEnumerator>) -> Self {
        self.services = services;
        self
    }

    pub fn with_sql_validator(mut self, sql: Box<dyn SqlValidator>) -> Self {
        self.sql = sql;
        self
    }

    /// Unique hosts to scan, lazily produced from the request.
    pub fn targets(&self) -> LocalBoxStream<'_, String> {
        let hosts = if self.request.computer_names.is_empty() {
            let sources = SOURCE_ORDER
                .into_iter()
                .filter(|source| self.request.discovery_type.contains(*source));
            stream::iter(sources)
                .flat_map(move |source| self.source_targets(source))
                .boxed_local()
        } else {
            stream::iter(self.request.computer_names.clone()).boxed_local()
        };

        let mut seen = HashSet::new();
        hosts
            .filter(move |host| {
                let key = normalize_host(host);
                future::ready(!key.is_empty() && seen.insert(key))
            })
            .boxed_local()
    }

    fn source_targets(&self, source: DiscoveryType) -> LocalBoxStream<'_, String> {
        if source == DiscoveryType::IP_RANGE {
            let ranges = if self.ip_ranges.is_empty() {
                match platform::local_subnets() {
                    Ok(subnets) => {
                        info!("Scanning local subnets: {:?}", subnets.iter().map(|s| s.to_string()).collect::<Vec<_>>());
                        subnets
                    }
                    Err(e) => {
                        warn!("Cannot enumerate local subnets, skipping IP range discovery: {}", e);
                        Vec::new()
                    }
                }
            } else {
                self.ip_ranges.clone()
            };
            info!(
                "Expanding {} IP range(s) into {} address(es)",
                ranges.len(),
                ranges.iter().map(IpRange::len).sum::<u64>()
            );
            return stream::iter(
                ranges
                    .into_iter()
                    .flat_map(|range| range.iter().map(|ip| ip.to_string())),
            )
            .boxed_local();
        }

        stream::once(self.enumerate_source(source))
            .flat_map(stream::iter)
            .boxed_local()
    }

    async fn enumerate_source(&self, source: DiscoveryType) -> Vec<String> {
        let result: Result<Vec<String>> = if source == DiscoveryType::DATA_SOURCE_ENUMERATION {
            self.browser
                .enumerate()
                .await
                .map(|replies| replies.into_iter().map(|r| r.machine_name).collect())
        } else {
            match &self.directory {
                Some(directory) if source == DiscoveryType::DOMAIN_SPN => directory
                    .find_sql_spns(None)
                    .await
                    .map(|entries| {
                        entries
                            .iter()
                            .flat_map(|entry| &entry.service_principal_names)
                            .filter_map(|raw| Spn::parse(raw))
                            .map(|spn| spn.host)
                            .collect()
                    }),
                Some(directory) => directory.find_windows_servers().await.map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| entry.host().map(str::to_string))
                        .collect()
                }),
                None => Err(ScanError::Discovery("no domain controller configured".to_string())),
            }
        };

        match result {
            Ok(hosts) => {
                info!("{:?} discovery found {} host(s)", source, hosts.len());
                hosts
            }
            Err(e) => {
                warn!("{:?} discovery failed, skipping: {}", source, e);
                Vec::new()
            }
        }
    }

    /// Run the probes selected by the request against one host, in order.
    pub async fn gather_evidence(&self, host: &str) -> HostEvidence {
        let scan = self.request.scan_types;
        let mut evidence = HostEvidence::new(host);

        if scan.contains(ScanType::DNS_RESOLVE) {
            evidence.dns = self.dns.resolve(host).await;
        }

        if let (true, Some(ping)) = (scan.contains(ScanType::PING), &self.ping) {
            let addresses = evidence
                .dns
                .as_ref()
                .map(|dns| dns.addresses.clone())
                .unwrap_or_default();
            evidence.ping = ping.ping(host, &addresses).await;
        }

        if scan.contains(ScanType::SPN) {
            evidence.spns = self.lookup_spns(host, evidence.dns.as_ref()).await;
        }

        let mut ports = self.request.tcp_ports.clone();
        ports.extend(evidence.spns.iter().filter_map(Spn::port));
        evidence.ports = tcp::probe_ports(host, &ports, self.config.tcp_connect_timeout()).await;

        if scan.contains(ScanType::BROWSER) {
            evidence.browse_replies = self.browser.browse(host).await;
        }

        if scan.contains(ScanType::SQL_SERVICE) {
            match self.services.services(host).await {
                Ok(services) => evidence.services = services,
                Err(e) => debug!("Service enumeration on {} failed: {}", host, e),
            }
        }

        evidence
    }

    async fn lookup_spns(&self, host: &str, dns: Option<&DnsResolution>) -> Vec<Spn> {
        let Some(directory) = &self.directory else {
            return Vec::new();
        };
        let name = dns.and_then(|d| d.fqdn.as_deref()).unwrap_or(host);

        let entries = match directory.find_sql_spns(Some(name)).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("SPN lookup for {} failed: {}", name, e);
                return Vec::new();
            }
        };

        let mut spns: Vec<Spn> = Vec::new();
        for spn in entries
            .iter()
            .flat_map(|entry| &entry.service_principal_names)
            .filter_map(|raw| Spn::parse(raw))
        {
            if same_host(&spn.host, name) && !spns.iter().any(|known| known.raw.eq_ignore_ascii_case(&spn.raw)) {
                spns.push(spn);
            }
        }
        spns
    }

    /// Probe, aggregate, validate and filter one host.
    pub async fn scan_host(&self, host: &str) -> Vec<InstanceCandidate> {
        info!("Scanning {}", host);
        let scan = self.request.scan_types;
        let minimum = self.request.minimum_confidence;

        let evidence = self.gather_evidence(host).await;
        let mut candidates = aggregate(&evidence, scan, minimum);

        if scan.contains(ScanType::SQL_CONNECT) {
            candidates = apply_sql_validation(self.sql.as_ref(), candidates).await;
        }

        retain_confident(&mut candidates, minimum);
        let now = Utc::now();
        for candidate in &mut candidates {
            candidate.timestamp = now;
        }

        debug!("{} produced {} candidate(s)", host, candidates.len());
        candidates
    }

    /// Stream of candidates. Hosts are scanned only as the stream is polled.
    pub fn discover(&self) -> LocalBoxStream<'_, InstanceCandidate> {
        self.targets()
            .then(move |host| async move { self.scan_host(&host).await })
            .flat_map(stream::iter)
            .boxed_local()
    }

    pub async fn discover_all(&self) -> Vec<InstanceCandidate> {
        self.discover().collect().await
    }
}

/// Whether an SPN host names `target`. Short names match FQDNs unless either side is an IP.
fn same_host(spn_host: &str, target: &str) -> bool {
    let a = normalize_host(spn_host);
    let b = normalize_host(target);
    if a == b {
        return true;
    }
    if a.parse::<IpAddr>().is_ok() || b.parse::<IpAddr>().is_ok() {
        return false;
    }
    let short = |name: &str| name.split('.').next().unwrap_or_default().to_string();
    (!a.contains('.') || !b.contains('.')) && short(&a) == short(&b)
}

/// Confirm candidates with a real connection. A server that answers at all,
/// even with an error below the fatal class, proves the instance. Connected
/// candidates that report an already seen `@@SERVERNAME` are dropped.
pub async fn apply_sql_validation(
    validator: &dyn SqlValidator,
    candidates: Vec<InstanceCandidate>,
) -> Vec<InstanceCandidate> {
    let mut seen = HashSet::new();
    let mut validated = Vec::with_capacity(candidates.len());

    for mut candidate in candidates {
        match validator.validate(&SqlTarget::from(&candidate)).await {
            SqlProbeOutcome::Connected {
                physical_name,
                domain_instance_name,
            } => {
                candidate.sql_connected = true;
                candidate.confidence = Confidence::High;
                if let Some(name) = physical_name {
                    candidate.machine_name = name;
                }
                if let Some(instance) = domain_instance_name {
                    if !seen.insert(instance.to_ascii_uppercase()) {
                        debug!("Dropping {}: duplicate of {}", candidate.sql_instance(), instance);
                        continue;
                    }
                }
            }
            SqlProbeOutcome::Rejected { severity, message } => {
                debug!(
                    "{} rejected the connection (class {}): {}",
                    candidate.sql_instance(),
                    severity,
                    message
                );
                candidate.sql_connected = true;
                candidate.confidence = Confidence::High;
            }
            SqlProbeOutcome::Failed(reason) => {
                debug!("SQL connect to {} failed: {}", candidate.sql_instance(), reason);
                candidate.sql_connected = false;
            }
        }
        validated.push(candidate);
    }

    validated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation() {
        assert!(DiscoveryRequest::default().validate().is_err());

        let mut both = DiscoveryRequest::for_hosts(["sql1"]);
        both.discovery_type = DiscoveryType::DOMAIN_SPN;
        assert!(matches!(both.validate(), Err(ScanError::InvalidInput(_))));

        let mut ranges = DiscoveryRequest::for_discovery(DiscoveryType::IP_RANGE);
        ranges.ip_ranges = vec!["10.1.1.1/30".into(), "10.2.0.1-10.2.0.5".into()];
        let parsed = ranges.validate().unwrap();
        assert_eq!(parsed[0].len(), 4);
        assert_eq!(parsed[1].len(), 5);

        ranges.ip_ranges.push("10.2.0.9-10.2.0.1".into());
        assert!(matches!(ranges.validate(), Err(ScanError::InvalidTarget(_))));

        let mut wrong_source = DiscoveryRequest::for_discovery(DiscoveryType::DOMAIN_SPN);
        wrong_source.ip_ranges = vec!["10.0.0.1".into()];
        assert!(wrong_source.validate().is_err());

        let mut port_zero = DiscoveryRequest::for_hosts(["sql1"]);
        port_zero.tcp_ports = vec![1433, 0];
        assert!(port_zero.validate().is_err());
    }

    #[test]
    fn spn_host_matching() {
        assert!(same_host("SQL1.dom.local", "sql1.dom.local."));
        assert!(same_host("sql1", "sql1.dom.local"));
        assert!(!same_host("sql10.dom.local", "sql1.dom.local"));
        assert!(!same_host("sql1.other.local", "sql1.dom.local"));
        assert!(!same_host("10.0.0.1", "10.0.0.10"));
    }
}

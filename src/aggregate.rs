//! Evidence fusion: turns everything probed on one host into instance
//! candidates with a confidence level.
//!
//! Signals and their weight:
//! - an installed service for an instance name: `High`
//! - a SQL Browser reply for an instance name: `Medium`
//! - an SPN naming an instance: `Low`
//! - an open port or an SPN port: `Low`, `Medium` when the port is an open
//!   1433 or an SPN names it
//!
//! Aggregation never filters by confidence; see [`retain_confident`].

use crate::types::{
    is_default_instance, Availability, BrowseReply, Confidence, HostEvidence, InstanceCandidate, ScanType,
    ServiceRecord, ServiceState, SqlServiceType, DEFAULT_SQL_PORT,
};
use log::debug;

pub fn aggregate(evidence: &HostEvidence, scan_types: ScanType, minimum: Confidence) -> Vec<InstanceCandidate> {
    let system_services: Vec<ServiceRecord> = evidence
        .services
        .iter()
        .filter(|s| s.instance_name.is_none())
        .cloned()
        .collect();

    let instance_names = instance_names(evidence);
    let ports = port_signals(evidence);

    if instance_names.is_empty() && ports.is_empty() {
        if evidence.is_alive() && minimum == Confidence::None {
            return vec![base_candidate(evidence, scan_types, &system_services)];
        }
        debug!("No SQL Server evidence on {}", evidence.computer_name);
        return Vec::new();
    }

    let mut candidates = Vec::new();
    let mut claimed_ports = Vec::new();

    for name in &instance_names {
        let candidate = named_candidate(evidence, scan_types, &system_services, name);
        if let Some(port) = candidate.port {
            claimed_ports.push(port);
        }
        candidates.push(candidate);
    }

    for port in ports {
        if claimed_ports.contains(&port) {
            continue;
        }
        candidates.push(port_candidate(evidence, scan_types, &system_services, port));
    }

    candidates
}

/// Drop candidates below `minimum`.
pub fn retain_confident(candidates: &mut Vec<InstanceCandidate>, minimum: Confidence) {
    candidates.retain(|candidate| candidate.confidence >= minimum);
}

fn same_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Unique instance names in signal order: services, browser, SPN suffixes.
fn instance_names(evidence: &HostEvidence) -> Vec<String> {
    let from_services = evidence.services.iter().filter_map(|s| s.instance_name.as_deref());
    let from_browser = evidence.browse_replies.iter().map(|r| r.instance_name.as_str());
    let from_spns = evidence.spns.iter().filter_map(|spn| spn.instance());

    let mut names: Vec<String> = Vec::new();
    for name in from_services.chain(from_browser).chain(from_spns) {
        if !names.iter().any(|known| same_name(known, name)) {
            names.push(name.to_string());
        }
    }
    names
}

/// Open tested ports first, then ports named by SPNs.
fn port_signals(evidence: &HostEvidence) -> Vec<u16> {
    let open = evidence.ports.iter().filter(|p| p.is_open).map(|p| p.port);
    let from_spns = evidence.spns.iter().filter_map(|spn| spn.port());

    let mut ports: Vec<u16> = Vec::new();
    for port in open.chain(from_spns) {
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports
}

fn base_candidate(
    evidence: &HostEvidence,
    scan_types: ScanType,
    system_services: &[ServiceRecord],
) -> InstanceCandidate {
    let mut candidate = InstanceCandidate::new(&evidence.computer_name, scan_types);
    candidate.dns_resolution = evidence.dns.clone();
    candidate.ping = evidence.ping;
    candidate.system_services = system_services.to_vec();
    candidate.ports_scanned = evidence.ports.clone();
    candidate
}

fn named_candidate(
    evidence: &HostEvidence,
    scan_types: ScanType,
    system_services: &[ServiceRecord],
    name: &str,
) -> InstanceCandidate {
    let mut candidate = base_candidate(evidence, scan_types, system_services);
    candidate.instance_name = Some(name.to_string());
    candidate.confidence = Confidence::Low;

    let reply: Option<&BrowseReply> = evidence
        .browse_replies
        .iter()
        .find(|r| same_name(&r.instance_name, name));
    if let Some(reply) = reply {
        candidate.confidence = Confidence::Medium;
        candidate.machine_name = reply.machine_name.clone();
        if let Some(port) = reply.tcp_port {
            candidate.port = Some(port);
            candidate.tcp_connected = evidence.is_port_open(port);
        }
        candidate.browse_reply = Some(reply.clone());
    }

    // A silent browser leaves the default instance on its well-known port.
    if candidate.port.is_none() && is_default_instance(name) && evidence.is_port_open(DEFAULT_SQL_PORT) {
        candidate.port = Some(DEFAULT_SQL_PORT);
        candidate.tcp_connected = true;
    }

    candidate.services = evidence
        .services
        .iter()
        .filter(|s| s.instance_name.as_deref().is_some_and(|n| same_name(n, name)))
        .cloned()
        .collect();
    if !candidate.services.is_empty() {
        candidate.confidence = Confidence::High;
        candidate.availability = engine_availability(&candidate.services);
    }

    candidate.spns = evidence
        .spns
        .iter()
        .filter(|spn| {
            spn.instance().is_some_and(|n| same_name(n, name))
                || (candidate.port.is_some() && spn.port() == candidate.port)
        })
        .map(|spn| spn.raw.clone())
        .collect();

    candidate
}

fn port_candidate(
    evidence: &HostEvidence,
    scan_types: ScanType,
    system_services: &[ServiceRecord],
    port: u16,
) -> InstanceCandidate {
    let mut candidate = base_candidate(evidence, scan_types, system_services);
    candidate.port = Some(port);
    candidate.tcp_connected = evidence.is_port_open(port);
    candidate.spns = evidence
        .spns
        .iter()
        .filter(|spn| spn.port() == Some(port))
        .map(|spn| spn.raw.clone())
        .collect();

    let default_port_open = port == DEFAULT_SQL_PORT && candidate.tcp_connected;
    candidate.confidence = if default_port_open || !candidate.spns.is_empty() {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    candidate
}

fn engine_availability(services: &[ServiceRecord]) -> Availability {
    match services.iter().find(|s| s.service_type == SqlServiceType::Engine) {
        Some(engine) => match engine.state {
            ServiceState::Running => Availability::Available,
            ServiceState::Stopped => Availability::Unavailable,
            ServiceState::Other(_) => Availability::Unknown,
        },
        None => Availability::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DnsResolution, PortResult, Spn};

    fn service(host: &str, instance: Option<&str>, service_type: SqlServiceType, state: ServiceState) -> ServiceRecord {
        ServiceRecord {
            computer_name: host.to_string(),
            display_name: format!("{:?}", service_type),
            instance_name: instance.map(str::to_string),
            service_type,
            state,
        }
    }

    fn reply(host: &str, instance: &str, port: Option<u16>) -> BrowseReply {
        BrowseReply {
            machine_name: host.to_uppercase(),
            computer_name: host.to_string(),
            instance_name: instance.to_string(),
            version: "16.0.1000.6".to_string(),
            is_clustered: false,
            tcp_port: port,
            named_pipe: None,
        }
    }

    fn ports(results: &[(u16, bool)]) -> Vec<PortResult> {
        results
            .iter()
            .map(|&(port, is_open)| PortResult { port, is_open })
            .collect()
    }

    #[test]
    fn running_engine_with_browser_reply() {
        let mut evidence = HostEvidence::new("sql1");
        evidence.ports = ports(&[(1433, true)]);
        evidence.browse_replies = vec![reply("sql1", "SQL1", Some(1433))];
        evidence.services = vec![
            service("sql1", Some("SQL1"), SqlServiceType::Engine, ServiceState::Running),
            service("sql1", Some("SQL1"), SqlServiceType::Agent, ServiceState::Stopped),
            service("sql1", None, SqlServiceType::Browser, ServiceState::Running),
        ];

        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Low);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.instance_name.as_deref(), Some("SQL1"));
        assert_eq!(c.port, Some(1433));
        assert_eq!(c.confidence, Confidence::High);
        assert_eq!(c.availability, Availability::Available);
        assert!(c.tcp_connected);
        assert_eq!(c.services.len(), 2);
        assert_eq!(c.system_services.len(), 1);
        assert_eq!(c.machine_name, "SQL1");
    }

    #[test]
    fn stopped_engine_is_unavailable() {
        let mut evidence = HostEvidence::new("sql1");
        evidence.services = vec![service("sql1", Some("MSSQLSERVER"), SqlServiceType::Engine, ServiceState::Stopped)];

        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Low);
        assert_eq!(candidates[0].confidence, Confidence::High);
        assert_eq!(candidates[0].availability, Availability::Unavailable);
    }

    #[test]
    fn default_instance_claims_open_1433_without_browser() {
        let mut evidence = HostEvidence::new("sql9");
        evidence.ports = ports(&[(1433, true)]);
        evidence.services = vec![service("sql9", Some("MSSQLSERVER"), SqlServiceType::Engine, ServiceState::Running)];

        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Low);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].instance_name.as_deref(), Some("MSSQLSERVER"));
        assert_eq!(candidates[0].port, Some(1433));
        assert!(candidates[0].tcp_connected);
        assert_eq!(candidates[0].confidence, Confidence::High);

        evidence.ports = ports(&[(1433, false)]);
        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Low);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].port, None);
        assert!(!candidates[0].tcp_connected);

        evidence.ports = ports(&[(1433, true)]);
        evidence.services = vec![service("sql9", Some("APP"), SqlServiceType::Engine, ServiceState::Running)];
        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Low);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].port, None);
        assert_eq!(candidates[1].port, Some(1433));
    }

    #[test]
    fn browser_only_is_medium() {
        let mut evidence = HostEvidence::new("db2");
        evidence.browse_replies = vec![reply("db2", "SQLEXPRESS", Some(49733)), reply("db2", "sqlexpress", None)];
        evidence.ports = ports(&[(1433, false)]);

        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Low);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, Confidence::Medium);
        assert_eq!(candidates[0].port, Some(49733));
        assert!(!candidates[0].tcp_connected);
        assert_eq!(candidates[0].availability, Availability::Unknown);
    }

    #[test]
    fn lone_open_port_confidence() {
        let mut evidence = HostEvidence::new("10.0.0.7");
        evidence.ports = ports(&[(1433, true)]);
        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Low);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].port, Some(1433));
        assert_eq!(candidates[0].confidence, Confidence::Medium);
        assert!(candidates[0].tcp_connected);

        evidence.ports = ports(&[(1433, false), (2433, true)]);
        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Low);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].port, Some(2433));
        assert_eq!(candidates[0].confidence, Confidence::Low);
    }

    #[test]
    fn spn_port_corroborates() {
        let mut evidence = HostEvidence::new("sql2.dom.local");
        evidence.spns = vec![Spn::parse("MSSQLsvc/sql2.dom.local:5555").unwrap()];
        evidence.ports = ports(&[(1433, false), (5555, true)]);

        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Low);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.port, Some(5555));
        assert_eq!(c.instance_name, None);
        assert_eq!(c.confidence, Confidence::Medium);
        assert!(c.tcp_connected);
        assert!(!c.sql_connected);
        assert_eq!(c.spns, vec!["MSSQLsvc/sql2.dom.local:5555".to_string()]);
    }

    #[test]
    fn spn_instance_is_low_and_port_is_claimed() {
        let mut evidence = HostEvidence::new("sql3");
        evidence.spns = vec![
            Spn::parse("MSSQLSvc/sql3:REPORTS").unwrap(),
            Spn::parse("MSSQLSvc/sql3:50123").unwrap(),
        ];
        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::None);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].instance_name.as_deref(), Some("REPORTS"));
        assert_eq!(candidates[0].confidence, Confidence::Low);
        assert_eq!(candidates[1].port, Some(50123));
        assert!(!candidates[1].tcp_connected);

        evidence.browse_replies = vec![reply("sql3", "REPORTS", Some(50123))];
        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::None);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, Confidence::Medium);
        assert_eq!(candidates[0].spns.len(), 2);
    }

    #[test]
    fn bare_host_only_without_threshold() {
        let mut evidence = HostEvidence::new("10.0.0.5");
        evidence.ping = true;
        evidence.ports = ports(&[(1433, false)]);

        let candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::None);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].ping);
        assert_eq!(candidates[0].instance_name, None);
        assert_eq!(candidates[0].port, None);
        assert_eq!(candidates[0].confidence, Confidence::None);

        assert!(aggregate(&evidence, ScanType::DEFAULT, Confidence::Low).is_empty());

        evidence.ping = false;
        assert!(aggregate(&evidence, ScanType::DEFAULT, Confidence::None).is_empty());

        evidence.dns = Some(DnsResolution {
            input: "10.0.0.5".into(),
            host_name: Some("app5".into()),
            fqdn: Some("app5.dom.local".into()),
            addresses: vec!["10.0.0.5".parse().unwrap()],
        });
        assert_eq!(aggregate(&evidence, ScanType::DEFAULT, Confidence::None).len(), 1);
    }

    #[test]
    fn threshold_filter() {
        let mut evidence = HostEvidence::new("mix");
        evidence.ports = ports(&[(1433, true), (2433, true)]);
        evidence.browse_replies = vec![reply("mix", "APP", None)];

        let mut candidates = aggregate(&evidence, ScanType::DEFAULT, Confidence::Medium);
        assert_eq!(candidates.len(), 3);
        retain_confident(&mut candidates, Confidence::Medium);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.confidence >= Confidence::Medium));
    }

    #[test]
    fn keys_are_stable() {
        let mut evidence = HostEvidence::new("SQL1");
        evidence.ports = ports(&[(1433, true)]);
        evidence.browse_replies = vec![reply("sql1", "APP", Some(50000))];

        let keys = |e: &HostEvidence| {
            aggregate(e, ScanType::DEFAULT, Confidence::None)
                .iter()
                .map(InstanceCandidate::key)
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&evidence), keys(&evidence));
        assert_eq!(
            keys(&evidence),
            vec![
                ("sql1".to_string(), "instance:APP".to_string()),
                ("sql1".to_string(), "port:1433".to_string()),
            ]
        );
    }
}

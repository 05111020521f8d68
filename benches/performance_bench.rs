use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sqlscout::aggregate::aggregate;
use sqlscout::probe::browser::parse_reply;
use sqlscout::types::{
    Confidence, HostEvidence, PortResult, ScanType, ServiceRecord, ServiceState, Spn, SqlServiceType,
};
use sqlscout::utils::network::IpRange;

fn browser_reply(instances: usize) -> Vec<u8> {
    let text: String = (0..instances)
        .map(|i| {
            format!(
                "ServerName;SQLHOST;InstanceName;INST{};IsClustered;No;Version;16.0.1000.6;tcp;{};np;\\\\SQLHOST\\pipe\\MSSQL$INST{}\\sql\\query;;",
                i,
                50000 + i,
                i
            )
        })
        .collect();
    let mut data = vec![0x05];
    data.extend_from_slice(&(text.len() as u16).to_le_bytes());
    data.extend_from_slice(text.as_bytes());
    data
}

fn parse_benchmark(c: &mut Criterion) {
    let single = browser_reply(1);
    let many = browser_reply(50);

    c.bench_function("ssrp_parse_single", |b| {
        b.iter(|| parse_reply(black_box(&single), "sqlhost"))
    });

    c.bench_function("ssrp_parse_50_instances", |b| {
        b.iter(|| parse_reply(black_box(&many), "sqlhost"))
    });
}

fn busy_host() -> HostEvidence {
    let mut evidence = HostEvidence::new("sqlhost.dom.local");
    evidence.ping = true;
    evidence.browse_replies = parse_reply(&browser_reply(20), "sqlhost.dom.local");
    evidence.ports = (0..20)
        .map(|i| PortResult { port: 50000 + i, is_open: i % 2 == 0 })
        .chain(std::iter::once(PortResult { port: 1433, is_open: true }))
        .collect();
    evidence.spns = (0..10)
        .filter_map(|i| Spn::parse(&format!("MSSQLSvc/sqlhost.dom.local:{}", 60000 + i)))
        .collect();
    evidence.services = (0..20)
        .map(|i| ServiceRecord {
            computer_name: "sqlhost.dom.local".to_string(),
            display_name: format!("SQL Server (INST{})", i),
            instance_name: Some(format!("INST{}", i)),
            service_type: SqlServiceType::Engine,
            state: ServiceState::Running,
        })
        .collect();
    evidence
}

fn aggregate_benchmark(c: &mut Criterion) {
    let evidence = busy_host();

    c.bench_function("aggregate_busy_host", |b| {
        b.iter(|| aggregate(black_box(&evidence), ScanType::DEFAULT, Confidence::Low))
    });
}

fn ip_range_benchmark(c: &mut Criterion) {
    c.bench_function("ip_range_expand_slash_20", |b| {
        b.iter(|| {
            let range = IpRange::parse(black_box("10.20.0.0/20")).unwrap();
            range.iter().count()
        })
    });
}

criterion_group!(benches, parse_benchmark, aggregate_benchmark, ip_range_benchmark);
criterion_main!(benches);

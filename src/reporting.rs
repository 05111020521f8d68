use crate::types::InstanceCandidate;
use crate::{Result, ScanError};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Coloured table
    #[default]
    Table,
    /// One JSON object per line
    Json,
    Csv,
}

/// Flat row for CSV output. Lists are joined with `;`.
#[derive(Debug, Serialize)]
struct CsvRecord<'a> {
    timestamp: String,
    computer_name: &'a str,
    machine_name: &'a str,
    sql_instance: String,
    instance_name: Option<&'a str>,
    port: Option<u16>,
    confidence: String,
    availability: String,
    ping: bool,
    tcp_connected: bool,
    sql_connected: bool,
    fqdn: Option<&'a str>,
    addresses: String,
    version: Option<&'a str>,
    is_clustered: Option<bool>,
    spns: String,
    services: String,
}

impl<'a> From<&'a InstanceCandidate> for CsvRecord<'a> {
    fn from(c: &'a InstanceCandidate) -> Self {
        let dns = c.dns_resolution.as_ref();
        Self {
            timestamp: c.timestamp.to_rfc3339(),
            computer_name: &c.computer_name,
            machine_name: &c.machine_name,
            sql_instance: c.sql_instance(),
            instance_name: c.instance_name.as_deref(),
            port: c.port,
            confidence: c.confidence.to_string(),
            availability: c.availability.to_string(),
            ping: c.ping,
            tcp_connected: c.tcp_connected,
            sql_connected: c.sql_connected,
            fqdn: dns.and_then(|d| d.fqdn.as_deref()),
            addresses: dns
                .map(|d| d.addresses.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(";"))
                .unwrap_or_default(),
            version: c.browse_reply.as_ref().map(|r| r.version.as_str()),
            is_clustered: c.browse_reply.as_ref().map(|r| r.is_clustered),
            spns: c.spns.join(";"),
            services: c
                .services
                .iter()
                .chain(&c.system_services)
                .map(|s| s.display_name.as_str())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}

enum Sink<W: Write> {
    Json(W),
    Csv(csv::Writer<W>),
}

/// Streams candidates as machine-readable records, flushing after each one.
pub struct ReportWriter<W: Write> {
    sink: Sink<W>,
    written: usize,
}

impl<W: Write> ReportWriter<W> {
    pub fn json(writer: W) -> Self {
        Self {
            sink: Sink::Json(writer),
            written: 0,
        }
    }

    pub fn csv(writer: W) -> Self {
        Self {
            sink: Sink::Csv(csv::Writer::from_writer(writer)),
            written: 0,
        }
    }

    /// `None` for the table format, which the display layer renders.
    pub fn for_format(format: OutputFormat, writer: W) -> Option<Self> {
        match format {
            OutputFormat::Table => None,
            OutputFormat::Json => Some(Self::json(writer)),
            OutputFormat::Csv => Some(Self::csv(writer)),
        }
    }

    pub fn write(&mut self, candidate: &InstanceCandidate) -> Result<()> {
        match &mut self.sink {
            Sink::Json(writer) => {
                serde_json::to_writer(&mut *writer, candidate)?;
                writeln!(writer)
                    .and_then(|_| writer.flush())
                    .map_err(|e| ScanError::Reporting(format!("Failed to write JSON record: {}", e)))?;
            }
            Sink::Csv(writer) => {
                writer.serialize(CsvRecord::from(candidate))?;
                writer
                    .flush()
                    .map_err(|e| ScanError::Reporting(format!("Failed to write CSV record: {}", e)))?;
            }
        }
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finish(self) -> Result<W> {
        match self.sink {
            Sink::Json(writer) => Ok(writer),
            Sink::Csv(writer) => writer
                .into_inner()
                .map_err(|e| ScanError::Reporting(format!("Failed to finish CSV output: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Confidence, ScanType};

    fn candidates() -> Vec<InstanceCandidate> {
        let mut named = InstanceCandidate::new("sql1", ScanType::DEFAULT);
        named.instance_name = Some("SQL1".into());
        named.port = Some(1433);
        named.confidence = Confidence::High;
        named.spns = vec!["MSSQLSvc/sql1:1433".into(), "MSSQLSvc/sql1:SQL1".into()];

        let mut port_only = InstanceCandidate::new("10.0.0.7", ScanType::DEFAULT);
        port_only.port = Some(5555);
        port_only.confidence = Confidence::Low;

        vec![named, port_only]
    }

    #[test]
    fn json_lines() {
        let mut writer = ReportWriter::json(Vec::new());
        for candidate in candidates() {
            writer.write(&candidate).unwrap();
        }
        assert_eq!(writer.written(), 2);

        let output = String::from_utf8(writer.finish().unwrap()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: InstanceCandidate = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.instance_name.as_deref(), Some("SQL1"));
        assert_eq!(first.confidence, Confidence::High);
    }

    #[test]
    fn csv_has_header_and_flat_rows() {
        let mut writer = ReportWriter::csv(Vec::new());
        for candidate in candidates() {
            writer.write(&candidate).unwrap();
        }
        let output = String::from_utf8(writer.finish().unwrap()).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,computer_name,machine_name,sql_instance"));
        assert!(lines[1].contains("sql1\\SQL1"));
        assert!(lines[1].contains("MSSQLSvc/sql1:1433;MSSQLSvc/sql1:SQL1"));
        assert!(lines[2].contains("\"10.0.0.7,5555\""));
    }

    #[test]
    fn table_has_no_writer() {
        assert!(ReportWriter::for_format(OutputFormat::Table, Vec::new()).is_none());
        assert!(ReportWriter::for_format(OutputFormat::Csv, Vec::new()).is_some());
    }
}

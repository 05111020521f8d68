//! SQL connect validation over TDS.

use crate::probe::BrowserProber;
use crate::types::{is_default_instance, Credential, InstanceCandidate, DEFAULT_SQL_PORT};
use crate::{Result, ScanError};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config as TdsConfig};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::TokioAsyncWriteCompatExt;

/// Server errors below this class mean a live server refused us.
pub const FATAL_SEVERITY: u8 = 25;

const IDENTITY_QUERY: &str = "SELECT CAST(SERVERPROPERTY('ComputerNamePhysicalNetBIOS') AS NVARCHAR(128)), CAST(@@SERVERNAME AS NVARCHAR(128))";

/// Where to connect. Built from a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTarget {
    pub host: String,
    pub port: Option<u16>,
    pub instance_name: Option<String>,
}

impl From<&InstanceCandidate> for SqlTarget {
    fn from(candidate: &InstanceCandidate) -> Self {
        Self {
            host: candidate.computer_name.clone(),
            port: candidate.port,
            instance_name: candidate.instance_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlProbeOutcome {
    /// Logged in and read the server identity.
    Connected {
        physical_name: Option<String>,
        domain_instance_name: Option<String>,
    },
    /// The server answered with an error of the given class.
    Rejected { severity: u8, message: String },
    /// Nothing that looked like SQL Server answered.
    Failed(String),
}

pub fn classify_server_error(severity: u8, message: &str) -> SqlProbeOutcome {
    if severity < FATAL_SEVERITY {
        SqlProbeOutcome::Rejected {
            severity,
            message: message.to_string(),
        }
    } else {
        SqlProbeOutcome::Failed(format!("fatal server error (class {}): {}", severity, message))
    }
}

fn classify_error(error: tiberius::error::Error) -> SqlProbeOutcome {
    match error {
        tiberius::error::Error::Server(token) => classify_server_error(token.class(), token.message()),
        other => SqlProbeOutcome::Failed(other.to_string()),
    }
}

#[async_trait]
pub trait SqlValidator: Send + Sync {
    async fn validate(&self, target: &SqlTarget) -> SqlProbeOutcome;
}

pub struct TiberiusValidator {
    credential: Option<Credential>,
    timeout: Duration,
    browser: BrowserProber,
}

impl TiberiusValidator {
    pub fn new(credential: Option<Credential>, timeout: Duration, browser: BrowserProber) -> Self {
        Self {
            credential,
            timeout,
            browser,
        }
    }

    /// Port for the target: its own, the browser's answer for a named instance, or 1433.
    async fn resolve_port(&self, target: &SqlTarget) -> Result<u16> {
        if let Some(port) = target.port {
            return Ok(port);
        }
        match target.instance_name.as_deref() {
            Some(name) if !is_default_instance(name) => self
                .browser
                .query_instance(&target.host, name)
                .await?
                .and_then(|reply| reply.tcp_port)
                .ok_or_else(|| {
                    ScanError::Database(format!("No TCP port advertised for {}\\{}", target.host, name))
                }),
            _ => Ok(DEFAULT_SQL_PORT),
        }
    }

    async fn connect(&self, host: &str, port: u16) -> tiberius::Result<SqlProbeOutcome> {
        let mut config = TdsConfig::new();
        config.host(host);
        config.port(port);
        config.application_name("sqlscout");
        config.trust_cert();
        if let Some(credential) = &self.credential {
            config.authentication(AuthMethod::sql_server(&credential.username, &credential.password));
        }

        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;

        let mut client = Client::connect(config, tcp.compat_write()).await?;
        let row = client.query(IDENTITY_QUERY, &[]).await?.into_row().await?;

        let (physical_name, domain_instance_name) = match &row {
            Some(row) => (
                row.try_get::<&str, _>(0)?.map(str::to_string),
                row.try_get::<&str, _>(1)?.map(str::to_string),
            ),
            None => (None, None),
        };
        client.close().await?;

        Ok(SqlProbeOutcome::Connected {
            physical_name,
            domain_instance_name,
        })
    }
}

#[async_trait]
impl SqlValidator for TiberiusValidator {
    async fn validate(&self, target: &SqlTarget) -> SqlProbeOutcome {
        let port = match self.resolve_port(target).await {
            Ok(port) => port,
            Err(e) => {
                debug!("Cannot locate {}: {}", target.host, e);
                return SqlProbeOutcome::Failed(e.to_string());
            }
        };

        let outcome = match timeout(self.timeout, self.connect(&target.host, port)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => classify_error(e),
            Err(_) => SqlProbeOutcome::Failed(format!("connect timed out after {:?}", self.timeout)),
        };
        debug!("SQL connect to {},{}: {:?}", target.host, port, outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScanType;

    #[test]
    fn severity_threshold() {
        assert!(matches!(
            classify_server_error(14, "Login failed for user 'sa'."),
            SqlProbeOutcome::Rejected { severity: 14, .. }
        ));
        assert!(matches!(classify_server_error(24, ""), SqlProbeOutcome::Rejected { .. }));
        assert!(matches!(classify_server_error(25, ""), SqlProbeOutcome::Failed(_)));
    }

    #[test]
    fn target_from_candidate() {
        let mut candidate = InstanceCandidate::new("sql3", ScanType::ALL);
        candidate.instance_name = Some("REPORTS".into());
        let target = SqlTarget::from(&candidate);
        assert_eq!(target.host, "sql3");
        assert_eq!(target.port, None);
        assert_eq!(target.instance_name.as_deref(), Some("REPORTS"));
    }

    /// Answers every instance query with the queried name on port 50123.
    async fn instance_browser() -> u16 {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                if len < 2 || buf[0] != crate::probe::browser::CLNT_UCAST_INST {
                    continue;
                }
                let name = String::from_utf8_lossy(&buf[1..len - 1]).to_string();
                let text = format!(
                    "ServerName;SQL3;InstanceName;{};IsClustered;No;Version;16.0.1000.6;tcp;50123;;",
                    name
                );
                let mut reply = vec![crate::probe::browser::SVR_RESP];
                reply.extend_from_slice(&(text.len() as u16).to_le_bytes());
                reply.extend_from_slice(text.as_bytes());
                let _ = socket.send_to(&reply, from).await;
            }
        });
        port
    }

    fn target(port: Option<u16>, instance: Option<&str>) -> SqlTarget {
        SqlTarget {
            host: "127.0.0.1".into(),
            port,
            instance_name: instance.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn port_resolution_order() {
        let browser_port = instance_browser().await;
        let validator = TiberiusValidator::new(
            None,
            Duration::from_secs(2),
            BrowserProber::new(browser_port, Duration::from_secs(2)),
        );

        assert_eq!(validator.resolve_port(&target(Some(5555), Some("REPORTS"))).await.unwrap(), 5555);
        assert_eq!(validator.resolve_port(&target(None, Some("REPORTS"))).await.unwrap(), 50123);
        assert_eq!(validator.resolve_port(&target(None, Some("mssqlserver"))).await.unwrap(), DEFAULT_SQL_PORT);
        assert_eq!(validator.resolve_port(&target(None, None)).await.unwrap(), DEFAULT_SQL_PORT);
    }

    #[tokio::test]
    async fn silent_browser_leaves_named_instance_unresolved() {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let validator = TiberiusValidator::new(
            None,
            Duration::from_secs(2),
            BrowserProber::new(socket.local_addr().unwrap().port(), Duration::from_millis(200)),
        );

        assert!(validator.resolve_port(&target(None, Some("REPORTS"))).await.is_err());
        let outcome = validator.validate(&target(None, Some("REPORTS"))).await;
        assert!(matches!(outcome, SqlProbeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn closed_port_is_not_sql_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let validator = TiberiusValidator::new(
            None,
            Duration::from_secs(2),
            BrowserProber::new(1434, Duration::from_millis(200)),
        );
        let outcome = validator
            .validate(&SqlTarget {
                host: "127.0.0.1".into(),
                port: Some(port),
                instance_name: None,
            })
            .await;
        assert!(matches!(outcome, SqlProbeOutcome::Failed(_)));
    }
}

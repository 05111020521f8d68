use crate::types::PortResult;
use log::debug;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Try a TCP connect to every port once. Ports are tested in the given order,
/// duplicates are skipped. Failures of any kind count as closed.
pub async fn probe_ports(host: &str, ports: &[u16], connect_timeout: Duration) -> Vec<PortResult> {
    let mut results: Vec<PortResult> = Vec::with_capacity(ports.len());

    for &port in ports {
        if results.iter().any(|r| r.port == port) {
            continue;
        }
        let is_open = is_port_open(host, port, connect_timeout).await;
        results.push(PortResult { port, is_open });
    }

    results
}

/// Scan a single TCP port
pub async fn is_port_open(host: &str, port: u16, connect_timeout: Duration) -> bool {
    match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            debug!("TCP Port {}:{} is open", host, port);
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            debug!("TCP Port {}:{} is closed: {}", host, port, e);
            false
        }
        Err(_) => {
            debug!("TCP Port {}:{} timed out", host, port);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn reports_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let results = probe_ports("127.0.0.1", &[open, closed, open], Duration::from_secs(2)).await;

        assert_eq!(
            results,
            vec![
                PortResult { port: open, is_open: true },
                PortResult { port: closed, is_open: false },
            ]
        );
    }

    #[tokio::test]
    async fn unresolvable_host_is_closed() {
        let results = probe_ports("host.invalid", &[1433], Duration::from_millis(500)).await;
        assert_eq!(results, vec![PortResult { port: 1433, is_open: false }]);
    }
}

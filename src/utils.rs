/// Network utilities
pub mod network {
    use crate::{Result, ScanError};
    use std::fmt;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    /// Inclusive IPv4 address range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IpRange {
        pub start: Ipv4Addr,
        pub end: Ipv4Addr,
    }

    impl IpRange {
        /// Parse `a.b.c.d`, `a.b.c.d-e.f.g.h`, `a.b.c.d/w.x.y.z` or `a.b.c.d/n`.
        ///
        /// Network forms cover every address from the network address to the
        /// broadcast address, both included.
        pub fn parse(spec: &str) -> Result<Self> {
            let spec = spec.trim();
            if spec.is_empty() {
                return Err(ScanError::InvalidTarget("Empty IP range".to_string()));
            }

            if let Some((base, mask)) = spec.split_once('/') {
                let base = parse_ipv4(base)?;
                let prefix_len = if mask.contains('.') {
                    prefix_from_mask(parse_ipv4(mask)?)?
                } else {
                    mask.trim().parse::<u8>().map_err(|_| {
                        ScanError::InvalidTarget(format!("Invalid prefix length: {}", mask))
                    })?
                };
                return Self::from_network(base, prefix_len);
            }

            if let Some((start, end)) = spec.split_once('-') {
                let start = parse_ipv4(start)?;
                let end = parse_ipv4(end)?;
                if u32::from(start) > u32::from(end) {
                    return Err(ScanError::InvalidTarget(format!(
                        "Start IP cannot be greater than end IP: {}",
                        spec
                    )));
                }
                return Ok(Self { start, end });
            }

            let ip = parse_ipv4(spec)?;
            Ok(Self { start: ip, end: ip })
        }

        pub fn from_network(ip: Ipv4Addr, prefix_len: u8) -> Result<Self> {
            if prefix_len > 32 {
                return Err(ScanError::InvalidTarget(
                    "Prefix length cannot exceed 32".to_string(),
                ));
            }
            let host_bits = 32 - u32::from(prefix_len);
            let host_mask = if host_bits == 32 { u32::MAX } else { (1u32 << host_bits) - 1 };
            let network = u32::from(ip) & !host_mask;
            Ok(Self {
                start: Ipv4Addr::from(network),
                end: Ipv4Addr::from(network | host_mask),
            })
        }

        pub fn len(&self) -> u64 {
            u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
        }

        pub fn contains(&self, ip: Ipv4Addr) -> bool {
            (u32::from(self.start)..=u32::from(self.end)).contains(&u32::from(ip))
        }

        /// Lazily walk the range in ascending order.
        pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> {
            (u32::from(self.start)..=u32::from(self.end)).map(Ipv4Addr::from)
        }
    }

    impl FromStr for IpRange {
        type Err = ScanError;

        fn from_str(s: &str) -> Result<Self> {
            IpRange::parse(s)
        }
    }

    impl fmt::Display for IpRange {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.start == self.end {
                write!(f, "{}", self.start)
            } else {
                write!(f, "{}-{}", self.start, self.end)
            }
        }
    }

    fn parse_ipv4(s: &str) -> Result<Ipv4Addr> {
        s.trim()
            .parse()
            .map_err(|_| ScanError::InvalidTarget(format!("Invalid IPv4 address: {}", s)))
    }

    /// Convert a dotted netmask to a prefix length. Non-contiguous masks are rejected.
    pub fn prefix_from_mask(mask: Ipv4Addr) -> Result<u8> {
        let bits = u32::from(mask);
        let prefix_len = bits.leading_ones();
        if bits.checked_shl(prefix_len).unwrap_or(0) != 0 {
            return Err(ScanError::InvalidTarget(format!("Non-contiguous netmask: {}", mask)));
        }
        Ok(prefix_len as u8)
    }

    /// Host identity used to make sure a host is scanned once.
    pub fn normalize_host(host: &str) -> String {
        host.trim().trim_end_matches('.').to_ascii_lowercase()
    }

}

/// Progress reporting on stderr
pub mod progress {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    /// Spinner for a scan of unknown length. Hidden in quiet mode.
    pub fn create_spinner(message: &str, quiet: bool) -> ProgressBar {
        if quiet {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {msg} {elapsed:.bright_black}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }
}

/// Time and formatting utilities
pub mod time {
    use std::time::Duration;

    /// Format duration as human readable string
    pub fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else if secs > 0 {
            format!("{}s", seconds)
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

}

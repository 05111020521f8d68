/// 平台兼容性模块
/// Local interface and host identity helpers shared by the discovery sources.

use crate::utils::network::{prefix_from_mask, IpRange};
use crate::{Result, ScanError};
use if_addrs::IfAddr;
use std::net::{IpAddr, Ipv4Addr};

/// 跨平台网络接口信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub is_loopback: bool,
}

impl NetworkInterface {
    /// The subnet this interface sits on.
    pub fn subnet(&self) -> Result<IpRange> {
        IpRange::from_network(self.ip, prefix_from_mask(self.netmask)?)
    }
}

/// 获取所有IPv4网络接口
pub fn get_ipv4_interfaces() -> Result<Vec<NetworkInterface>> {
    let addrs = if_addrs::get_if_addrs()
        .map_err(|e| ScanError::SystemError(format!("Failed to get network interfaces: {}", e)))?;

    Ok(addrs
        .into_iter()
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(ref v4) => Some(NetworkInterface {
                name: iface.name.clone(),
                ip: v4.ip,
                netmask: v4.netmask,
                is_loopback: v4.ip.is_loopback(),
            }),
            IfAddr::V6(_) => None,
        })
        .collect())
}

/// Subnets of every non-loopback IPv4 interface, without duplicates.
pub fn local_subnets() -> Result<Vec<IpRange>> {
    let mut subnets: Vec<IpRange> = Vec::new();
    for iface in get_ipv4_interfaces()? {
        if iface.is_loopback || iface.ip.is_link_local() {
            continue;
        }
        let subnet = iface.subnet()?;
        if !subnets.contains(&subnet) {
            subnets.push(subnet);
        }
    }
    Ok(subnets)
}

pub fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
}

/// Whether `host` names the machine we are running on.
pub fn is_local_host(host: &str) -> bool {
    let host = host.trim().trim_end_matches('.');
    if host == "." || host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback();
    }
    match local_hostname() {
        Some(local) => {
            let short = host.split('.').next().unwrap_or(host);
            let local_short = local.split('.').next().unwrap_or(&local);
            host.eq_ignore_ascii_case(&local) || short.eq_ignore_ascii_case(local_short)
        }
        None => false,
    }
}

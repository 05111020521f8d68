//! Installed SQL Server services per host.
//!
//! Live service enumeration (WMI/CIM) is a Windows-only concern, so the
//! scanner talks to it through [`ServiceEnumerator`]. The bundled
//! implementation answers from an inventory file exported by whatever
//! management tooling already knows the estate.

use crate::platform;
use crate::types::{ServiceRecord, ServiceState, SqlServiceType, DEFAULT_INSTANCE_NAME};
use crate::utils::network::normalize_host;
use crate::{Result, ScanError};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[async_trait]
pub trait ServiceEnumerator: Send + Sync {
    async fn services(&self, computer_name: &str) -> Result<Vec<ServiceRecord>>;
}

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(default, rename = "host")]
    hosts: Vec<InventoryHost>,
}

#[derive(Debug, Deserialize)]
struct InventoryHost {
    computer_name: String,
    #[serde(default)]
    services: Vec<InventoryService>,
}

#[derive(Debug, Deserialize)]
struct InventoryService {
    service_name: Option<String>,
    display_name: Option<String>,
    instance_name: Option<String>,
    service_type: Option<SqlServiceType>,
    #[serde(default)]
    state: Option<String>,
}

impl InventoryService {
    fn into_record(self, computer_name: &str) -> ServiceRecord {
        let (classified_type, classified_instance) = self
            .service_name
            .as_deref()
            .map(classify_service)
            .unwrap_or((SqlServiceType::Other, None));

        ServiceRecord {
            computer_name: computer_name.to_string(),
            display_name: self
                .display_name
                .or(self.service_name)
                .unwrap_or_default(),
            instance_name: self.instance_name.or(classified_instance),
            service_type: self.service_type.unwrap_or(classified_type),
            state: self.state.as_deref().map(parse_state).unwrap_or(ServiceState::Other(String::new())),
        }
    }
}

/// Map a Windows service name to its SQL Server role and instance.
pub fn classify_service(service_name: &str) -> (SqlServiceType, Option<String>) {
    let (base, instance) = match service_name.split_once('$') {
        Some((base, instance)) => (base, Some(instance.to_string())),
        None => (service_name, None),
    };
    let default = || Some(DEFAULT_INSTANCE_NAME.to_string());
    let base = base.to_ascii_uppercase();

    match base.as_str() {
        "MSSQLSERVER" => (SqlServiceType::Engine, default()),
        "MSSQL" => (SqlServiceType::Engine, instance),
        "SQLSERVERAGENT" => (SqlServiceType::Agent, default()),
        "SQLAGENT" => (SqlServiceType::Agent, instance),
        "SQLBROWSER" => (SqlServiceType::Browser, None),
        "MSSQLFDLAUNCHER" => (SqlServiceType::FullText, instance.or_else(default)),
        "REPORTSERVER" => (SqlServiceType::Ssrs, instance.or_else(default)),
        "SQLSERVERREPORTINGSERVICES" | "POWERBIREPORTSERVER" => (SqlServiceType::Ssrs, None),
        "MSSQLSERVEROLAPSERVICE" => (SqlServiceType::Ssas, default()),
        "MSOLAP" => (SqlServiceType::Ssas, instance),
        "SQLPBENGINE" | "SQLPBDMS" => (SqlServiceType::PolyBase, instance.or_else(default)),
        name if name.starts_with("MSDTSSERVER") => (SqlServiceType::Ssis, None),
        _ => (SqlServiceType::Other, instance),
    }
}

fn parse_state(state: &str) -> ServiceState {
    match state.trim().to_ascii_lowercase().as_str() {
        "running" => ServiceState::Running,
        "stopped" => ServiceState::Stopped,
        _ => ServiceState::Other(state.trim().to_string()),
    }
}

/// Static host to services map, loaded from TOML or JSON.
#[derive(Debug, Clone, Default)]
pub struct ServiceInventory {
    hosts: HashMap<String, Vec<ServiceRecord>>,
}

impl ServiceInventory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ServiceRecord) {
        self.hosts
            .entry(normalize_host(&record.computer_name))
            .or_default()
            .push(record);
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let file: InventoryFile = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content).map_err(|e| {
                ScanError::InvalidInput(format!("Invalid service inventory {}: {}", path.display(), e))
            })?
        };

        let mut inventory = Self::empty();
        for host in file.hosts {
            for service in host.services {
                inventory.insert(service.into_record(&host.computer_name));
            }
        }
        debug!("Loaded service inventory for {} host(s) from {}", inventory.len(), path.display());
        Ok(inventory)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn lookup(&self, computer_name: &str) -> Option<&Vec<ServiceRecord>> {
        let wanted = normalize_host(computer_name);
        if let Some(records) = self.hosts.get(&wanted) {
            return Some(records);
        }

        let short = |name: &str| name.split('.').next().unwrap_or_default().to_string();
        let is_ip = wanted.parse::<std::net::IpAddr>().is_ok();
        self.hosts
            .iter()
            .find(|(key, _)| {
                (!is_ip && key.parse::<std::net::IpAddr>().is_err() && short(key) == short(&wanted))
                    || (platform::is_local_host(key) && platform::is_local_host(&wanted))
            })
            .map(|(_, records)| records)
    }
}

#[async_trait]
impl ServiceEnumerator for ServiceInventory {
    async fn services(&self, computer_name: &str) -> Result<Vec<ServiceRecord>> {
        Ok(self
            .lookup(computer_name)
            .map(|records| {
                records
                    .iter()
                    .cloned()
                    .map(|mut record| {
                        record.computer_name = computer_name.to_string();
                        record
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

//! Active Directory lookups over LDAP: SQL Server SPNs and Windows servers.

use crate::types::Credential;
use crate::{Result, ScanError};
use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use log::debug;
use std::collections::HashMap;
use std::time::Duration;

/// Entries per page; keeps every response under the server's size limit.
pub const PAGE_SIZE: i32 = 200;

pub const WINDOWS_SERVER_FILTER: &str = "(&(objectCategory=computer)(operatingSystem=*windows*server*)(!(userAccountControl:1.2.840.113556.1.4.803:=2)))";

const ENTRY_ATTRIBUTES: [&str; 3] = ["cn", "dNSHostName", "servicePrincipalName"];

/// Search filter for SQL Server SPNs, optionally narrowed to one computer.
pub fn spn_filter(computer_name: Option<&str>) -> String {
    match computer_name {
        Some(name) => format!("(servicePrincipalName=MSSQLsvc/{}*)", ldap_escape(name)),
        None => "(servicePrincipalName=MSSQLsvc*)".to_string(),
    }
}

/// The parts of a directory object the scanner cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub name: Option<String>,
    pub dns_host_name: Option<String>,
    pub service_principal_names: Vec<String>,
}

impl DirectoryEntry {
    /// Best host name for the entry: `dNSHostName`, then `cn`.
    pub fn host(&self) -> Option<&str> {
        self.dns_host_name.as_deref().or(self.name.as_deref())
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        let first = |attrs: &HashMap<String, Vec<String>>, name: &str| {
            attribute(attrs, name).and_then(|values| values.first().cloned())
        };
        Self {
            name: first(&entry.attrs, "cn"),
            dns_host_name: first(&entry.attrs, "dNSHostName"),
            service_principal_names: attribute(&entry.attrs, "servicePrincipalName")
                .cloned()
                .unwrap_or_default(),
            dn: entry.dn,
        }
    }
}

fn attribute<'a>(attrs: &'a HashMap<String, Vec<String>>, name: &str) -> Option<&'a Vec<String>> {
    attrs
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, values)| values)
}

/// Directory search seam. Errors propagate; callers decide how loud to be.
#[async_trait]
pub trait DirectorySearcher: Send + Sync {
    async fn find_sql_spns(&self, computer_name: Option<&str>) -> Result<Vec<DirectoryEntry>>;

    async fn find_windows_servers(&self) -> Result<Vec<DirectoryEntry>>;
}

pub struct LdapDirectory {
    server: String,
    port: Option<u16>,
    use_ldaps: bool,
    credential: Option<Credential>,
    timeout: Duration,
}

impl LdapDirectory {
    pub fn new(server: impl Into<String>, credential: Option<Credential>) -> Self {
        Self {
            server: server.into(),
            port: None,
            use_ldaps: false,
            credential,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_ldaps(mut self, use_ldaps: bool) -> Self {
        self.use_ldaps = use_ldaps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> String {
        let (scheme, default_port) = if self.use_ldaps { ("ldaps", 636) } else { ("ldap", 389) };
        format!("{}://{}:{}", scheme, self.server, self.port.unwrap_or(default_port))
    }

    async fn connect(&self) -> Result<Ldap> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.url()).await?;
        ldap3::drive!(conn);

        if let Some(credential) = &self.credential {
            ldap.simple_bind(&credential.username, &credential.password)
                .await?
                .success()?;
        }
        Ok(ldap)
    }

    async fn naming_context(ldap: &mut Ldap) -> Result<String> {
        let (entries, _) = ldap
            .search("", Scope::Base, "(objectClass=*)", vec!["defaultNamingContext"])
            .await?
            .success()?;

        entries
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .and_then(|entry| {
                attribute(&entry.attrs, "defaultNamingContext").and_then(|v| v.first().cloned())
            })
            .ok_or_else(|| ScanError::Directory("RootDSE has no defaultNamingContext".to_string()))
    }

    async fn paged_search(&self, filter: &str) -> Result<Vec<DirectoryEntry>> {
        let mut ldap = self.connect().await?;
        let base = Self::naming_context(&mut ldap).await?;
        debug!("LDAP search on {} under {}: {}", self.server, base, filter);

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(PAGE_SIZE)),
        ];
        let mut search = ldap
            .streaming_search_with(adapters, &base, Scope::Subtree, filter, ENTRY_ATTRIBUTES.to_vec())
            .await?;

        let mut entries = Vec::new();
        while let Some(entry) = search.next().await? {
            entries.push(DirectoryEntry::from(SearchEntry::construct(entry)));
        }
        search.finish().await.success()?;
        ldap.unbind().await?;

        debug!("LDAP search on {} returned {} entries", self.server, entries.len());
        Ok(entries)
    }
}

#[async_trait]
impl DirectorySearcher for LdapDirectory {
    async fn find_sql_spns(&self, computer_name: Option<&str>) -> Result<Vec<DirectoryEntry>> {
        self.paged_search(&spn_filter(computer_name)).await
    }

    async fn find_windows_servers(&self) -> Result<Vec<DirectoryEntry>> {
        self.paged_search(WINDOWS_SERVER_FILTER).await
    }
}

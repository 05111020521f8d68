use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("DNS resolution error: {0}")]
    DnsResolution(String),

    #[error("Directory lookup error: {0}")]
    Directory(String),

    #[error("SQL Server error: {0}")]
    Database(String),

    #[error("Timeout occurred during {operation}")]
    Timeout { operation: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid target format: {0}")]
    InvalidTarget(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Reporting error: {0}")]
    Reporting(String),

    #[error("System error: {0}")]
    SystemError(String),
}

impl From<ldap3::LdapError> for ScanError {
    fn from(err: ldap3::LdapError) -> Self {
        ScanError::Directory(format!("LDAP error: {}", err))
    }
}

impl From<tiberius::error::Error> for ScanError {
    fn from(err: tiberius::error::Error) -> Self {
        ScanError::Database(format!("SQL Server error: {}", err))
    }
}

impl From<trust_dns_resolver::error::ResolveError> for ScanError {
    fn from(err: trust_dns_resolver::error::ResolveError) -> Self {
        ScanError::DnsResolution(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ScanError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ScanError::Timeout {
            operation: "network operation".to_string(),
        }
    }
}

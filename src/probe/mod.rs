//! Evidence collectors. Each prober turns its own failures into "no evidence"
//! except the directory prober, whose errors are handled by the caller.

pub mod browser;
pub mod directory;
pub mod dns;
pub mod ping;
pub mod service;
pub mod sql;
pub mod tcp;

pub use browser::BrowserProber;
pub use directory::{DirectoryEntry, DirectorySearcher, LdapDirectory};
pub use dns::DnsProber;
pub use ping::PingProber;
pub use service::{ServiceEnumerator, ServiceInventory};
pub use sql::{SqlProbeOutcome, SqlTarget, SqlValidator, TiberiusValidator};

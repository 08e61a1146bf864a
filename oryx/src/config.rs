//! Top-level daemon configuration. Grounded on the teacher's
//! `src/config.rs` `ProviderConfig`/`CompanionConfig`, trimmed to a
//! single daemon role (the Companion/Provider split tracked which
//! storage backend an account used; since storage is now always
//! `oryx_mail::storage::MemoryDatabase`, that split has no remaining
//! purpose here) and with the LDAP/Garage-backed `UserManagement`
//! variants dropped along with the storage drivers they selected.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use oryx_user::config::{AuthConfig, ImapConfig, ImapUnsecureConfig, LoginStaticConfig, PopConfig};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Path to write this process's PID to, used by `reload` to find it.
    pub pid: Option<PathBuf>,

    pub imap: Option<ImapConfig>,
    pub imap_unsecure: Option<ImapUnsecureConfig>,
    pub pop: Option<PopConfig>,
    pub auth: Option<AuthConfig>,
    pub delivery: Option<DeliveryConfig>,

    pub users: LoginStaticConfig,
}

/// Outbound SMTP spool configuration: the one smarthost every
/// `DeliveryAgent` relays through (spec.md §4.13's only in-scope
/// routing policy) and the hostname it identifies itself with.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeliveryConfig {
    pub smarthost: String,
    #[serde(default = "default_smtp_port")]
    pub smarthost_port: u16,
    pub reporting_mta: String,
}

fn default_smtp_port() -> u16 {
    25
}

pub fn read_config(config_file: PathBuf) -> Result<Config> {
    let data = std::fs::read_to_string(config_file)?;
    Ok(toml::from_str(&data)?)
}

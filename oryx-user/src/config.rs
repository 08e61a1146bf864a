//! Static user-list configuration. Grounded on the teacher's
//! `src/config.rs` `UserEntry`/`StaticStorage` types, trimmed to the
//! fields `oryx-user` still needs once the Garage/S3/K2V storage
//! backend selection moves out of scope (storage is now the
//! `oryx_mail::storage::Database` collaborator, which this crate does
//! not configure).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// TLS-terminating IMAP listener configuration (implicit TLS on port 993).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImapConfig {
    pub bind_addr: SocketAddr,
    pub certs: PathBuf,
    pub key: PathBuf,
}

/// Plaintext IMAP listener, STARTTLS-capable, used for local testing or
/// behind a TLS-terminating proxy.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImapUnsecureConfig {
    pub bind_addr: SocketAddr,
}

/// Plaintext POP3 listener. STLS is negotiated in-band (RFC 2595), so
/// unlike IMAP there is no separate implicit-TLS variant.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PopConfig {
    pub bind_addr: SocketAddr,
    pub certs: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Dovecot-style external-AUTH listener, used by mail transfer agents
/// (Postfix, Exim) to authenticate SASL PLAIN/LOGIN credentials against
/// this server's user list without speaking IMAP or POP3.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthConfig {
    pub bind_addr: SocketAddr,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserEntry {
    #[serde(default)]
    pub email_addresses: Vec<String>,
    /// An Argon2 PHC string, produced by [`crate::login::static_provider::hash_password`].
    pub password: String,
    /// Base64-encoded secretbox key unlocking this user's cryptoblobs.
    pub master_key: Option<String>,
}

pub type UserList = HashMap<String, UserEntry>;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginStaticConfig {
    pub user_list: PathBuf,
}

pub fn read_user_list(path: &Path) -> Result<UserList> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading user list at {}", path.display()))?;
    toml::from_str(&data).with_context(|| format!("parsing user list at {}", path.display()))
}

pub fn write_user_list(path: &Path, list: &UserList) -> Result<()> {
    let data = toml::to_string(list).context("serializing user list")?;
    std::fs::write(path, data)
        .with_context(|| format!("writing user list at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_user_list() {
        let toml_str = r#"
            [alice]
            password = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHQ$aGFzaA"
            email_addresses = ["alice@example.com"]
        "#;
        let list: UserList = toml::from_str(toml_str).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list["alice"].master_key.is_none());
    }
}

//! A `LoginProvider` backed by a TOML user list, hot-reloaded on
//! `SIGUSR1`. Grounded on the teacher's `src/login/static_provider.rs`
//! (`update_user_list`/watch-channel reload pattern) and
//! `aero-user/src/login/static_provider.rs` (the argon2
//! `hash_password`/`verify_password` helpers), with the Garage/K2V
//! storage wiring dropped since storage is out of scope here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::{read_user_list, UserEntry, UserList};
use crate::cryptoblob::Key as MasterKey;
use crate::login::{Credentials, LoginProvider, UserState};
use crate::permissions::{Grants, Right};

struct ContextualUserEntry {
    username: String,
    config: UserEntry,
}

#[derive(Default)]
struct UserDatabase {
    users: HashMap<String, Arc<ContextualUserEntry>>,
    users_by_email: HashMap<String, Arc<ContextualUserEntry>>,
}

fn build_user_database(list: UserList) -> UserDatabase {
    let users = list
        .into_iter()
        .map(|(username, config)| {
            (
                username.clone(),
                Arc::new(ContextualUserEntry { username, config }),
            )
        })
        .collect::<HashMap<_, _>>();

    let mut users_by_email = HashMap::new();
    for u in users.values() {
        for addr in u.config.email_addresses.iter() {
            if users_by_email.contains_key(addr) {
                tracing::warn!(address = %addr, "several users share the same email address");
                continue;
            }
            users_by_email.insert(addr.clone(), u.clone());
        }
    }

    UserDatabase {
        users,
        users_by_email,
    }
}

/// Watches `path` and republishes the parsed user list on `tx` every
/// time `SIGUSR1` is received, so an operator can add or remove users
/// without restarting the server.
async fn watch_user_list(path: PathBuf, tx: watch::Sender<UserDatabase>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut reload = signal(SignalKind::user_defined1())
        .context("installing SIGUSR1 handler for user list reload")?;

    loop {
        match read_user_list(&path) {
            Ok(list) => {
                let db = build_user_database(list);
                tracing::info!(users = db.users.len(), "user list (re)loaded");
                tx.send(db).context("publishing reloaded user list")?;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unable to load user list");
            }
        }
        reload.recv().await;
        tracing::info!("received SIGUSR1, reloading user list");
    }
}

pub struct StaticLoginProvider {
    user_db: watch::Receiver<UserDatabase>,
}

impl StaticLoginProvider {
    /// Loads `path` once synchronously (so a bad config fails fast at
    /// startup) and spawns the background watcher for subsequent
    /// reloads.
    pub async fn new(path: PathBuf) -> Result<Self> {
        let initial = build_user_database(read_user_list(&path)?);
        let (tx, rx) = watch::channel(initial);
        tokio::spawn(watch_user_list(path, tx));
        Ok(Self { user_db: rx })
    }

    fn grants_for(entry: &UserEntry) -> Grants {
        let mut grants = Grants::new();
        grants.grant("INBOX", Right::ReadWrite);
        let _ = &entry.email_addresses;
        grants
    }
}

#[async_trait]
impl LoginProvider for StaticLoginProvider {
    async fn login(&self, username: &str, password: &str) -> Result<Credentials> {
        tracing::debug!(user = %username, "login");
        let user = {
            let db = self.user_db.borrow();
            match db.users.get(username) {
                None => bail!("user {} does not exist", username),
                Some(u) => u.clone(),
            }
        };

        if !verify_password(password, &user.config.password)? {
            bail!("wrong password");
        }

        let master_key = user
            .config
            .master_key
            .as_ref()
            .map(|s| {
                let raw = base64::decode(s)?;
                MasterKey::from_slice(&raw).ok_or_else(|| anyhow!("invalid master key"))
            })
            .transpose()?;

        Ok(Credentials {
            username: user.username.clone(),
            master_key,
            grants: Self::grants_for(&user.config),
        })
    }

    async fn resolve_by_email(&self, email: &str) -> UserState {
        let db = self.user_db.borrow();
        if db.users_by_email.contains_key(email) {
            UserState::Active
        } else {
            UserState::Nonexistent
        }
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    use argon2::{
        password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
        Argon2,
    };
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    Ok(argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("argon2 error: {}", e))?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    use argon2::{
        password_hash::{PasswordHash, PasswordVerifier},
        Argon2,
    };
    let parsed_hash = PasswordHash::new(hash).map_err(|e| anyhow!("invalid hashed password: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[tokio::test]
    async fn login_rejects_unknown_user() {
        let db = build_user_database(UserList::new());
        let (_tx, rx) = watch::channel(db);
        let provider = StaticLoginProvider { user_db: rx };
        assert!(provider.login("nobody", "pw").await.is_err());
    }

    #[tokio::test]
    async fn login_grants_inbox_readwrite() {
        let mut list = UserList::new();
        list.insert(
            "alice".to_string(),
            UserEntry {
                email_addresses: vec!["alice@example.com".to_string()],
                password: hash_password("hunter2").unwrap(),
                master_key: None,
            },
        );
        let db = build_user_database(list);
        let (_tx, rx) = watch::channel(db);
        let provider = StaticLoginProvider { user_db: rx };

        let creds = provider.login("alice", "hunter2").await.unwrap();
        assert_eq!(creds.grants.right_for("INBOX"), Some(Right::ReadWrite));
        assert!(provider.login("alice", "wrong").await.is_err());

        assert_eq!(
            provider.resolve_by_email("alice@example.com").await,
            UserState::Active
        );
        assert_eq!(
            provider.resolve_by_email("nobody@example.com").await,
            UserState::Nonexistent
        );
    }
}

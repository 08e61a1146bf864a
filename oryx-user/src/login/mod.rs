pub mod static_provider;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::cryptoblob::Key as MasterKey;
use crate::permissions::Grants;

/// What a successful login yields: the user's cryptoblob master key (if
/// one is configured for them) and the mailbox rights they hold.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub master_key: Option<MasterKey>,
    pub grants: Grants,
}

/// The state of a user referenced by a URL fetcher URL (spec.md §4.12
/// step 1) that has not necessarily authenticated in this session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserState {
    Unverified,
    Nonexistent,
    Active,
}

#[async_trait]
pub trait LoginProvider: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<Credentials>;

    /// Resolves a user by one of their configured email addresses
    /// without a password, used by the URL fetcher to check a `URLAUTH`
    /// target's existence (spec.md §4.12 step 1) before it is known
    /// whether the token itself is valid.
    async fn resolve_by_email(&self, email: &str) -> UserState;
}

/// The shared handle protocol front-ends (IMAP, POP3) hold onto.
pub type ArcLoginProvider = Arc<dyn LoginProvider>;

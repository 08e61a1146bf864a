//! An account's mailbox name -> id mapping. Grounded on the teacher's
//! `mail/namespace.rs` `MailboxList`, trimmed from its K2V LWW-merge
//! shape (this storage boundary assumes one writer per account, not
//! concurrent replicas) down to a plain map persisted as a single row.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use oryx_core::{gen_ident, UniqueIdent};
use serde::{Deserialize, Serialize};

use super::uidindex::ImapUidvalidity;

pub const MAILBOX_HIERARCHY_DELIMITER: char = '.';

/// INBOX always exists; it is created the first time an account's
/// namespace is loaded.
pub const INBOX: &str = "INBOX";

/// RFC 6154 SPECIAL-USE mailboxes created alongside INBOX.
pub const DRAFTS: &str = "Drafts";
pub const ARCHIVE: &str = "Archive";
pub const SENT: &str = "Sent";
pub const TRASH: &str = "Trash";

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
struct NamespaceEntry {
    id: UniqueIdent,
    uidvalidity: ImapUidvalidity,
}

#[derive(Serialize, Deserialize, Default, Clone)]
pub struct MailboxNamespace(BTreeMap<String, NamespaceEntry>);

pub enum CreatedMailbox {
    Created(UniqueIdent, ImapUidvalidity),
    Existed(UniqueIdent, ImapUidvalidity),
}

impl MailboxNamespace {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn existing_mailbox_names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn has_mailbox(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn get_mailbox(&self, name: &str) -> Option<(UniqueIdent, ImapUidvalidity)> {
        self.0.get(name).map(|e| (e.id, e.uidvalidity))
    }

    pub fn update_uidvalidity(&mut self, name: &str, new_uidvalidity: ImapUidvalidity) {
        if let Some(e) = self.0.get_mut(name) {
            e.uidvalidity = std::cmp::max(e.uidvalidity, new_uidvalidity);
        }
    }

    pub fn create_mailbox(&mut self, name: &str) -> CreatedMailbox {
        if let Some(e) = self.0.get(name) {
            return CreatedMailbox::Existed(e.id, e.uidvalidity);
        }
        let id = gen_ident();
        let uidvalidity = ImapUidvalidity::new(1).unwrap();
        self.0.insert(name.into(), NamespaceEntry { id, uidvalidity });
        CreatedMailbox::Created(id, uidvalidity)
    }

    pub fn set_mailbox(&mut self, name: &str, id: Option<UniqueIdent>) {
        match id {
            None => {
                self.0.remove(name);
            }
            Some(id) => {
                let uidvalidity = self
                    .0
                    .get(name)
                    .map(|e| ImapUidvalidity::new(e.uidvalidity.get() + 1).unwrap())
                    .unwrap_or_else(|| ImapUidvalidity::new(1).unwrap());
                self.0.insert(name.into(), NamespaceEntry { id, uidvalidity });
            }
        }
    }

    pub fn rename_mailbox(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let (id, uidvalidity) = match self.get_mailbox(old_name) {
            Some(v) => v,
            None => bail!(
                "Cannot rename {} into {}: {} doesn't exist",
                old_name,
                new_name,
                old_name
            ),
        };
        if self.has_mailbox(new_name) {
            bail!(
                "Cannot rename {} into {}: {} already exists",
                old_name,
                new_name,
                new_name
            );
        }
        self.set_mailbox(old_name, None);
        self.set_mailbox(new_name, Some(id));
        self.update_uidvalidity(new_name, uidvalidity);
        Ok(())
    }
}

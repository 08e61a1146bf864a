//! The storage collaborator. §1 places the SQL database and its
//! transaction primitive out of scope; this module names the thin
//! `async_trait` shape the rest of `oryx-mail` calls into, generalized
//! from the teacher's `RowStore`/`RowRef` K2V abstraction (`src/storage/
//! mod.rs`) to SQL-shaped rows, per SPEC_FULL.md §3.1. No on-disk format
//! is specified; `MemoryDatabase` below exists for tests only.

use std::collections::BTreeMap;
use std::sync::Mutex;

use oryx_core::UniqueIdent;
use thiserror::Error;

use crate::mail::namespace::MailboxNamespace;
use crate::mail::uidindex::UidIndex;
use crate::message::MailMeta;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// A mailbox's persisted row: its UID index (the CRDT-ish counters and
/// flag/uid tables from `uidindex`) plus per-message metadata and bodies,
/// addressed by [`UniqueIdent`]. A SQL-backed implementation would keep
/// the index as one row `FOR UPDATE`-locked during mutation and messages
/// as rows in a child table; that locking discipline is the collaborator's
/// job, not this trait's.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    async fn load_index(&self, mailbox_id: UniqueIdent) -> Result<UidIndex, StoreError>;
    async fn save_index(&self, mailbox_id: UniqueIdent, index: &UidIndex) -> Result<(), StoreError>;

    async fn fetch_meta(
        &self,
        mailbox_id: UniqueIdent,
        message_id: UniqueIdent,
    ) -> Result<MailMeta, StoreError>;

    async fn fetch_body(
        &self,
        mailbox_id: UniqueIdent,
        message_id: UniqueIdent,
    ) -> Result<Vec<u8>, StoreError>;

    async fn store_message(
        &self,
        mailbox_id: UniqueIdent,
        message_id: UniqueIdent,
        meta: MailMeta,
        body: Vec<u8>,
    ) -> Result<(), StoreError>;

    async fn delete_message(
        &self,
        mailbox_id: UniqueIdent,
        message_id: UniqueIdent,
    ) -> Result<(), StoreError>;

    /// The account-level mailbox name -> id namespace, keyed by
    /// username. Absent until the first mailbox is created for that
    /// account.
    async fn load_namespace(&self, username: &str) -> Result<MailboxNamespace, StoreError>;
    async fn save_namespace(
        &self,
        username: &str,
        namespace: &MailboxNamespace,
    ) -> Result<(), StoreError>;
}

/// An in-memory `Database` used by unit and integration tests.
#[derive(Default)]
pub struct MemoryDatabase {
    indices: Mutex<BTreeMap<UniqueIdent, UidIndex>>,
    meta: Mutex<BTreeMap<(UniqueIdent, UniqueIdent), MailMeta>>,
    bodies: Mutex<BTreeMap<(UniqueIdent, UniqueIdent), Vec<u8>>>,
    namespaces: Mutex<BTreeMap<String, MailboxNamespace>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Database for MemoryDatabase {
    async fn load_index(&self, mailbox_id: UniqueIdent) -> Result<UidIndex, StoreError> {
        Ok(self
            .indices
            .lock()
            .unwrap()
            .get(&mailbox_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_index(&self, mailbox_id: UniqueIdent, index: &UidIndex) -> Result<(), StoreError> {
        self.indices.lock().unwrap().insert(mailbox_id, index.clone());
        Ok(())
    }

    async fn fetch_meta(
        &self,
        mailbox_id: UniqueIdent,
        message_id: UniqueIdent,
    ) -> Result<MailMeta, StoreError> {
        self.meta
            .lock()
            .unwrap()
            .get(&(mailbox_id, message_id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn fetch_body(
        &self,
        mailbox_id: UniqueIdent,
        message_id: UniqueIdent,
    ) -> Result<Vec<u8>, StoreError> {
        self.bodies
            .lock()
            .unwrap()
            .get(&(mailbox_id, message_id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn store_message(
        &self,
        mailbox_id: UniqueIdent,
        message_id: UniqueIdent,
        meta: MailMeta,
        body: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.meta
            .lock()
            .unwrap()
            .insert((mailbox_id, message_id), meta);
        self.bodies
            .lock()
            .unwrap()
            .insert((mailbox_id, message_id), body);
        Ok(())
    }

    async fn delete_message(
        &self,
        mailbox_id: UniqueIdent,
        message_id: UniqueIdent,
    ) -> Result<(), StoreError> {
        self.meta.lock().unwrap().remove(&(mailbox_id, message_id));
        self.bodies.lock().unwrap().remove(&(mailbox_id, message_id));
        Ok(())
    }

    async fn load_namespace(&self, username: &str) -> Result<MailboxNamespace, StoreError> {
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_namespace(
        &self,
        username: &str,
        namespace: &MailboxNamespace,
    ) -> Result<(), StoreError> {
        self.namespaces
            .lock()
            .unwrap()
            .insert(username.to_string(), namespace.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_message() {
        let db = MemoryDatabase::new();
        let mbox = oryx_core::gen_ident();
        let msg = oryx_core::gen_ident();
        let meta = MailMeta {
            internaldate: 0,
            headers: vec![1, 2, 3],
            message_key: vec![],
            rfc822_size: 42,
        };
        db.store_message(mbox, msg, meta.clone(), b"body".to_vec())
            .await
            .unwrap();
        let got = db.fetch_meta(mbox, msg).await.unwrap();
        assert_eq!(got.rfc822_size, 42);
        db.delete_message(mbox, msg).await.unwrap();
        assert!(matches!(
            db.fetch_meta(mbox, msg).await,
            Err(StoreError::NotFound)
        ));
    }
}

//! A mailbox: its UID index plus the storage collaborator used to read
//! and write message bodies/metadata. Grounded on the teacher's
//! `src/mail/mailbox.rs` (same public surface, same copy/move
//! lock-ordering rule), with the K2V/S3/Bayou specifics replaced by the
//! `storage::Database` collaborator per SPEC_FULL.md §3.1.

use std::sync::Arc;

use anyhow::{Context, Result};
use oryx_core::UniqueIdent;
use tokio::sync::RwLock;

use crate::mail::uidindex::{Flag, ImapUid, UidIndex};
use crate::message::MailMeta;
use crate::storage::Database;

pub struct Mailbox {
    pub id: UniqueIdent,
    db: Arc<dyn Database>,
    state: RwLock<UidIndex>,
}

impl Mailbox {
    pub async fn open(id: UniqueIdent, db: Arc<dyn Database>) -> Result<Arc<Self>> {
        let index = db
            .load_index(id)
            .await
            .context("loading mailbox uid index")?;
        Ok(Arc::new(Mailbox {
            id,
            db,
            state: RwLock::new(index),
        }))
    }

    pub async fn current_uid_index(&self) -> UidIndex {
        self.state.read().await.clone()
    }

    pub async fn force_sync(&self) -> Result<()> {
        let fresh = self.db.load_index(self.id).await?;
        *self.state.write().await = fresh;
        Ok(())
    }

    pub async fn fetch_meta(&self, id: UniqueIdent) -> Result<MailMeta> {
        Ok(self.db.fetch_meta(self.id, id).await?)
    }

    pub async fn fetch_full(&self, id: UniqueIdent) -> Result<Vec<u8>> {
        Ok(self.db.fetch_body(self.id, id).await?)
    }

    pub async fn append(&self, meta: MailMeta, body: Vec<u8>, flags: Vec<Flag>) -> Result<UniqueIdent> {
        let id = oryx_core::gen_ident();
        self.db
            .store_message(self.id, id, meta, body)
            .await
            .context("storing appended message")?;
        let mut state = self.state.write().await;
        let op = state.op_mail_add(id, flags);
        *state = state.apply(&op);
        self.db.save_index(self.id, &state).await?;
        Ok(id)
    }

    pub async fn delete(&self, id: UniqueIdent) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let op = state.op_mail_del(id);
            *state = state.apply(&op);
            self.db.save_index(self.id, &state).await?;
        }
        self.db.delete_message(self.id, id).await?;
        Ok(())
    }

    pub async fn add_flags(&self, id: UniqueIdent, flags: Vec<Flag>) -> Result<()> {
        let mut state = self.state.write().await;
        let op = state.op_flag_add(id, flags);
        *state = state.apply(&op);
        self.db.save_index(self.id, &state).await?;
        Ok(())
    }

    pub async fn del_flags(&self, id: UniqueIdent, flags: Vec<Flag>) -> Result<()> {
        let mut state = self.state.write().await;
        let op = state.op_flag_del(id, flags);
        *state = state.apply(&op);
        self.db.save_index(self.id, &state).await?;
        Ok(())
    }

    pub async fn set_flags(&self, id: UniqueIdent, flags: Vec<Flag>) -> Result<()> {
        let mut state = self.state.write().await;
        let op = state.op_flag_set(id, flags);
        *state = state.apply(&op);
        self.db.save_index(self.id, &state).await?;
        Ok(())
    }

    /// Copies a message from `from` into `self`. Unlike the teacher's
    /// mailbox (which held both mailboxes' in-process locks across the
    /// copy and so had to order them by id to avoid deadlock), this
    /// implementation never holds two mailboxes' `state` locks at once —
    /// reads go straight to the storage collaborator — so no such
    /// ordering is required here.
    pub async fn copy_from(&self, from: &Mailbox, id: UniqueIdent, flags: Vec<Flag>) -> Result<UniqueIdent> {
        let meta = from.fetch_meta(id).await?;
        let body = from.fetch_full(id).await?;
        self.append(meta, body, flags).await
    }

    pub async fn move_from(&self, from: &Mailbox, id: UniqueIdent, flags: Vec<Flag>) -> Result<UniqueIdent> {
        let new_id = self.copy_from(from, id, flags).await?;
        from.delete(id).await?;
        Ok(new_id)
    }

    pub async fn uid_of(&self, id: UniqueIdent) -> Option<ImapUid> {
        self.state.read().await.table.get(&id).map(|(uid, _, _)| *uid)
    }

    /// Takes a consistent snapshot of this mailbox for a single IMAP
    /// session to browse, per the teacher's SELECT-time freeze.
    pub async fn frozen(self: &Arc<Self>) -> crate::snapshot::FrozenMailbox {
        crate::snapshot::FrozenMailbox::new(self.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDatabase;

    #[tokio::test]
    async fn append_fetch_delete_roundtrip() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let mbox = Mailbox::open(oryx_core::gen_ident(), db).await.unwrap();

        let meta = MailMeta {
            internaldate: 0,
            headers: vec![],
            message_key: vec![],
            rfc822_size: 3,
        };
        let id = mbox
            .append(meta, b"abc".to_vec(), vec!["\\Recent".to_string()])
            .await
            .unwrap();

        assert_eq!(mbox.fetch_full(id).await.unwrap(), b"abc");
        assert!(mbox.uid_of(id).await.is_some());

        mbox.delete(id).await.unwrap();
        assert!(mbox.fetch_full(id).await.is_err());
    }

    #[tokio::test]
    async fn copy_between_mailboxes() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let a = Mailbox::open(oryx_core::gen_ident(), db.clone()).await.unwrap();
        let b = Mailbox::open(oryx_core::gen_ident(), db).await.unwrap();

        let meta = MailMeta {
            internaldate: 0,
            headers: vec![],
            message_key: vec![],
            rfc822_size: 1,
        };
        let id = a.append(meta, b"x".to_vec(), vec![]).await.unwrap();
        let new_id = b.copy_from(&a, id, vec![]).await.unwrap();
        assert_eq!(b.fetch_full(new_id).await.unwrap(), b"x");
        assert!(a.fetch_full(id).await.is_ok());
    }
}

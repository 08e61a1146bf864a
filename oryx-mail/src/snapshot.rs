//! An immutable in-RAM snapshot of a mailbox, and the streaming query
//! that reads against it. Grounded on the teacher's
//! `src/mail/snapshot.rs` (`FrozenMailbox`) and `src/mail/query.rs`
//! (`Query`/`QueryScope`), with `futures::stream::FuturesUnordered`
//! kept for the full-content fan-out fetch.

use anyhow::{anyhow, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use oryx_core::UniqueIdent;

use crate::mail::mailbox::Mailbox;
use crate::mail::uidindex::UidIndex;
use crate::message::{IndexView, QueryResult};
use std::sync::Arc;

/// A mailbox plus a snapshot of its UID index, desynchronized from the
/// live mailbox on purpose: it is up to the caller to decide when to
/// refresh it, so that a SELECT/NOOP/IDLE response can be computed as a
/// diff against a stable prior view.
pub struct FrozenMailbox {
    pub mailbox: Arc<Mailbox>,
    pub snapshot: UidIndex,
}

impl FrozenMailbox {
    pub async fn new(mailbox: Arc<Mailbox>) -> Self {
        let snapshot = mailbox.current_uid_index().await;
        Self { mailbox, snapshot }
    }

    /// Forces the underlying mailbox to resync with storage, without
    /// updating this snapshot.
    pub async fn sync(&self) -> Result<()> {
        self.mailbox.force_sync().await
    }

    /// Peeks the mailbox's current index without updating the local
    /// snapshot — useful for planning writes ahead of sending a diff
    /// built from the old snapshot.
    pub async fn peek(&self) -> UidIndex {
        self.mailbox.current_uid_index().await
    }

    /// Replaces the local snapshot with the mailbox's current index,
    /// returning the old one so the caller can diff against it.
    pub async fn update(&mut self) -> UidIndex {
        let old = self.snapshot.clone();
        self.snapshot = self.mailbox.current_uid_index().await;
        old
    }

    pub fn query<'a, 'b>(&'a self, uuids: &'b [UniqueIdent], scope: QueryScope) -> Query<'a, 'b> {
        Query {
            frozen: self,
            emails: uuids,
            scope,
        }
    }
}

/// How deep a [`Query`] should populate each [`QueryResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryScope {
    Index,
    Partial,
    Full,
}

/// Fetches a list of messages against a frozen snapshot, populating no
/// more than the requested `scope` asks for.
pub struct Query<'a, 'b> {
    pub frozen: &'a FrozenMailbox,
    pub emails: &'b [UniqueIdent],
    pub scope: QueryScope,
}

impl<'a, 'b> Query<'a, 'b> {
    pub async fn fetch(&self) -> Result<Vec<QueryResult>> {
        match self.scope {
            QueryScope::Index => self.index(),
            QueryScope::Partial => self.partial().await,
            QueryScope::Full => self.full().await,
        }
    }

    fn index(&self) -> Result<Vec<QueryResult>> {
        self.emails
            .iter()
            .map(|uuid| {
                self.frozen
                    .snapshot
                    .table
                    .get(uuid)
                    .map(|(uid, modseq, flags)| QueryResult::IndexResult {
                        index: IndexView {
                            uuid: *uuid,
                            uid: *uid,
                            modseq: *modseq,
                            flags: flags.clone(),
                        },
                    })
                    .ok_or_else(|| anyhow!("missing email in index"))
            })
            .collect::<Result<Vec<_>>>()
    }

    async fn partial(&self) -> Result<Vec<QueryResult>> {
        let index = self.index()?;
        let mut result = Vec::with_capacity(index.len());
        for r in index {
            let meta = self.frozen.mailbox.fetch_meta(r.uuid()).await?;
            result.push(r.into_partial(meta));
        }
        Ok(result)
    }

    async fn full(&self) -> Result<Vec<QueryResult>> {
        let partial = self.partial().await?;
        partial
            .into_iter()
            .map(|r| async move {
                let content = self.frozen.mailbox.fetch_full(r.uuid()).await?;
                Ok(r.into_full(content))
            })
            .collect::<FuturesUnordered<_>>()
            .collect::<Vec<Result<QueryResult>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::uidindex::Flag;
    use crate::message::MailMeta;
    use crate::storage::{Database, MemoryDatabase};
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn query_scopes_populate_incrementally() {
        let db: StdArc<dyn Database> = StdArc::new(MemoryDatabase::new());
        let mbox = Mailbox::open(oryx_core::gen_ident(), db).await.unwrap();
        let id = mbox
            .append(
                MailMeta {
                    internaldate: 0,
                    headers: vec![],
                    message_key: vec![],
                    rfc822_size: 3,
                },
                b"abc".to_vec(),
                vec!["\\Recent".to_string() as Flag],
            )
            .await
            .unwrap();

        let frozen = FrozenMailbox::new(mbox).await;

        let idx = frozen.query(&[id], QueryScope::Index).fetch().await.unwrap();
        assert_eq!(idx.len(), 1);
        assert!(idx[0].metadata().is_none());

        let partial = frozen.query(&[id], QueryScope::Partial).fetch().await.unwrap();
        assert!(partial[0].metadata().is_some());
        assert!(partial[0].content().is_none());

        let full = frozen.query(&[id], QueryScope::Full).fetch().await.unwrap();
        assert_eq!(full[0].content(), Some(&b"abc"[..]));
    }

    #[tokio::test]
    async fn frozen_snapshot_does_not_see_concurrent_append_until_updated() {
        let db: StdArc<dyn Database> = StdArc::new(MemoryDatabase::new());
        let mbox = Mailbox::open(oryx_core::gen_ident(), db).await.unwrap();
        let mut frozen = FrozenMailbox::new(mbox.clone()).await;

        let id = mbox
            .append(
                MailMeta {
                    internaldate: 0,
                    headers: vec![],
                    message_key: vec![],
                    rfc822_size: 1,
                },
                b"x".to_vec(),
                vec![],
            )
            .await
            .unwrap();

        assert!(frozen.query(&[id], QueryScope::Index).fetch().await.is_err());
        frozen.update().await;
        assert!(frozen.query(&[id], QueryScope::Index).fetch().await.is_ok());
    }
}

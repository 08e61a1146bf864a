//! The `deliveries`/`delivery_recipients` collaborator, grounded on
//! spec.md §3's DeliveryRow/RecipientRow definitions and the storage
//! collaborator shape SPEC_FULL.md §3.1 asks for (`oryx_mail::storage::
//! Database`'s sibling for the outbound side, same `FOR UPDATE`-row
//! locking contract, generalized from the teacher's own
//! `src/storage/mod.rs` `RowStore`/`RowRef` abstraction).

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use oryx_core::UniqueIdent;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("delivery row not found")]
    NotFound,
    #[error("delivery row is locked by another worker")]
    Locked,
    #[error("storage backend error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// RFC 3464 action codes a recipient can be in; only `Unknown` and
/// `Delayed` are non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientAction {
    Unknown,
    Delayed,
    Delivered,
    Relayed,
    Expanded,
    Failed,
}

impl RecipientAction {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecipientAction::Unknown | RecipientAction::Delayed)
    }
}

#[derive(Debug, Clone)]
pub struct RecipientRow {
    pub address: String,
    pub action: RecipientAction,
    pub status_text: String,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl RecipientRow {
    pub fn pending(address: String) -> Self {
        Self {
            address,
            action: RecipientAction::Unknown,
            status_text: String::new(),
            last_attempt: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryRow {
    pub id: UniqueIdent,
    /// The rendered RFC 5322 message to submit; out-of-line like the
    /// original's large-object message bodies.
    pub message: Vec<u8>,
    pub sender: Option<String>,
    pub recipients: Vec<RecipientRow>,
    pub expires_at: DateTime<Utc>,
    pub tried_at: Option<DateTime<Utc>>,
    /// Set once every recipient is terminal; the row is never deleted.
    pub delivered: bool,
    /// True for a DSN/bounce message itself, so a failed bounce never
    /// spawns another bounce (spec.md §4.13 step 7's "sender is not the
    /// null sender" guard).
    pub is_bounce: bool,
}

impl DeliveryRow {
    pub fn is_complete(&self) -> bool {
        self.recipients.iter().all(|r| r.action.is_terminal())
    }
}

/// Thin SQL-shaped collaborator: `FOR UPDATE` row locking, modeled as a
/// guard object rather than an actual transaction, since no on-disk
/// format is specified (SPEC_FULL.md §3.1).
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn enqueue(&self, row: DeliveryRow) -> Result<(), StoreError>;

    /// Row ids where `tried_at IS NULL OR tried_at + retry_after < now()`
    /// and the delivery is not yet marked delivered.
    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        retry_after: chrono::Duration,
    ) -> Result<Vec<UniqueIdent>, StoreError>;

    /// Acquires the row for exclusive processing by one DeliveryAgent;
    /// `Err(StoreError::Locked)` if another worker already holds it.
    async fn lock(&self, id: UniqueIdent) -> Result<DeliveryRow, StoreError>;

    async fn commit(&self, row: DeliveryRow) -> Result<(), StoreError>;

    /// Releases a lock without writing back, used when the agent
    /// finishes a row silently (step 1: row already gone).
    async fn unlock(&self, id: UniqueIdent);
}

#[derive(Default)]
pub struct MemoryDeliveryStore {
    rows: Mutex<BTreeMap<UniqueIdent, DeliveryRow>>,
    locked: Mutex<std::collections::HashSet<UniqueIdent>>,
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn enqueue(&self, row: DeliveryRow) -> Result<(), StoreError> {
        self.rows.lock().unwrap().insert(row.id, row);
        Ok(())
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        retry_after: chrono::Duration,
    ) -> Result<Vec<UniqueIdent>, StoreError> {
        let locked = self.locked.lock().unwrap();
        let due = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| !r.delivered && !locked.contains(&r.id))
            .filter(|r| match r.tried_at {
                None => true,
                Some(t) => t + retry_after < now,
            })
            .map(|r| r.id)
            .collect();
        Ok(due)
    }

    async fn lock(&self, id: UniqueIdent) -> Result<DeliveryRow, StoreError> {
        let mut locked = self.locked.lock().unwrap();
        if locked.contains(&id) {
            return Err(StoreError::Locked);
        }
        let row = self
            .rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        locked.insert(id);
        Ok(row)
    }

    async fn commit(&self, row: DeliveryRow) -> Result<(), StoreError> {
        self.rows.lock().unwrap().insert(row.id, row.clone());
        self.locked.lock().unwrap().remove(&row.id);
        Ok(())
    }

    async fn unlock(&self, id: UniqueIdent) {
        self.locked.lock().unwrap().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oryx_core::gen_ident;

    fn make_row(recipients: usize) -> DeliveryRow {
        DeliveryRow {
            id: gen_ident(),
            message: b"From: a@example.com\r\nTo: b@example.com\r\n\r\nhi\r\n".to_vec(),
            sender: Some("a@example.com".into()),
            recipients: (0..recipients)
                .map(|i| RecipientRow::pending(format!("r{i}@example.com")))
                .collect(),
            expires_at: Utc::now() + chrono::Duration::days(5),
            tried_at: None,
            delivered: false,
            is_bounce: false,
        }
    }

    #[tokio::test]
    async fn never_scans_a_locked_row() {
        let store = MemoryDeliveryStore::new();
        let row = make_row(1);
        let id = row.id;
        store.enqueue(row).await.unwrap();

        let _locked = store.lock(id).await.unwrap();
        let due = store
            .due_for_retry(Utc::now(), chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn completion_requires_all_recipients_terminal() {
        let mut row = make_row(2);
        row.recipients[0].action = RecipientAction::Delivered;
        assert!(!row.is_complete());
        row.recipients[1].action = RecipientAction::Failed;
        assert!(row.is_complete());
    }
}

//! Process-wide caches shared across sessions: [`MessageCache`] (UID ->
//! cached [`QueryResult`], keyed first by mailbox id) and [`UnseenCache`]
//! (first-unseen MSN, keyed by mailbox id and modseq). Grounded on
//! `original_source/message/messagecache.cpp`; `MessageCache` is built on
//! [`oryx_core::PatriciaMap`] for the UID-keyed lookup, with eviction
//! using a generation counter invalidated on session close rather than a
//! GC pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use oryx_core::{PatriciaMap, UniqueIdent};

use crate::message::QueryResult;

#[derive(Clone)]
struct CacheSlot {
    result: Arc<QueryResult>,
    generation: u64,
}

#[derive(Default)]
struct MailboxCache {
    by_uid: PatriciaMap<CacheSlot>,
}

/// A process-wide cache shared by the IMAP and POP layers: a message
/// fetched by one protocol warms the cache the other protocol reads.
pub struct MessageCache {
    mailboxes: Mutex<HashMap<UniqueIdent, MailboxCache>>,
    generation: Mutex<u64>,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCache {
    pub fn new() -> Self {
        MessageCache {
            mailboxes: Mutex::new(HashMap::new()),
            generation: Mutex::new(0),
        }
    }

    fn uid_key(uid: std::num::NonZeroU32) -> u64 {
        uid.get() as u64
    }

    pub fn get(&self, mailbox_id: UniqueIdent, uid: std::num::NonZeroU32) -> Option<Arc<QueryResult>> {
        let mailboxes = self.mailboxes.lock().unwrap();
        mailboxes
            .get(&mailbox_id)?
            .by_uid
            .find(Self::uid_key(uid))
            .map(|slot| slot.result.clone())
    }

    pub fn insert(&self, mailbox_id: UniqueIdent, uid: std::num::NonZeroU32, result: QueryResult) {
        let generation = *self.generation.lock().unwrap();
        let mut mailboxes = self.mailboxes.lock().unwrap();
        mailboxes
            .entry(mailbox_id)
            .or_default()
            .by_uid
            .insert(
                Self::uid_key(uid),
                CacheSlot {
                    result: Arc::new(result),
                    generation,
                },
            );
    }

    /// Bumps the generation counter on session close. Entries written
    /// before the bump become invisible to `get_checked` callers that
    /// pass the new generation as their floor; `PatriciaMap` exposes no
    /// iteration (only find/insert/remove/contains/count/clear) so
    /// stale slots are reclaimed lazily as later inserts overwrite
    /// them, rather than swept eagerly here.
    pub fn end_session(&self) -> u64 {
        let mut generation = self.generation.lock().unwrap();
        *generation += 1;
        *generation
    }

    pub fn get_checked(
        &self,
        mailbox_id: UniqueIdent,
        uid: std::num::NonZeroU32,
        min_generation: u64,
    ) -> Option<Arc<QueryResult>> {
        let mailboxes = self.mailboxes.lock().unwrap();
        let slot = mailboxes.get(&mailbox_id)?.by_uid.find(Self::uid_key(uid))?;
        if slot.generation < min_generation {
            None
        } else {
            Some(slot.result.clone())
        }
    }

    pub fn invalidate(&self, mailbox_id: UniqueIdent, uid: std::num::NonZeroU32) {
        if let Some(mailbox) = self.mailboxes.lock().unwrap().get_mut(&mailbox_id) {
            mailbox.by_uid.remove(Self::uid_key(uid));
        }
    }
}

use crate::mail::uidindex::ModSeq;

/// The process-wide FirstUnseen cache: the MSN of a mailbox's first
/// unseen message, keyed strictly by `(mailbox-id, nextModSeq)`. A
/// lookup at a `ModSeq` other than the one an entry was stored at is a
/// miss; `put` overwrites that entry, so stale values self-invalidate
/// as soon as `nextModSeq` advances instead of needing an explicit
/// eviction pass.
#[derive(Default)]
pub struct UnseenCache {
    entries: Mutex<HashMap<UniqueIdent, (ModSeq, Option<std::num::NonZeroU32>)>>,
}

impl UnseenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mailbox_id: UniqueIdent, modseq: ModSeq) -> Option<Option<std::num::NonZeroU32>> {
        self.entries
            .lock()
            .unwrap()
            .get(&mailbox_id)
            .filter(|(cached_modseq, _)| *cached_modseq == modseq)
            .map(|(_, value)| *value)
    }

    pub fn put(&self, mailbox_id: UniqueIdent, modseq: ModSeq, value: Option<std::num::NonZeroU32>) {
        self.entries.lock().unwrap().insert(mailbox_id, (modseq, value));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod unseen_cache_tests {
    use super::*;

    #[test]
    fn miss_then_hit_then_invalidated_by_modseq_advance() {
        let cache = UnseenCache::new();
        let mbox = oryx_core::gen_ident();
        let v1 = std::num::NonZeroU64::new(1).unwrap();
        let v2 = std::num::NonZeroU64::new(2).unwrap();
        let first_unseen = std::num::NonZeroU32::new(2);

        assert_eq!(cache.get(mbox, v1), None);
        cache.put(mbox, v1, first_unseen);
        assert_eq!(cache.get(mbox, v1), Some(first_unseen));

        // Mailbox moved on to a new modseq: the old entry no longer matches.
        assert_eq!(cache.get(mbox, v2), None);
        cache.put(mbox, v2, None);
        assert_eq!(cache.get(mbox, v1), None);
        assert_eq!(cache.get(mbox, v2), Some(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::IndexView;

    fn sample_result() -> QueryResult {
        QueryResult::IndexResult {
            index: IndexView {
                uuid: oryx_core::gen_ident(),
                uid: std::num::NonZeroU32::new(1).unwrap(),
                modseq: std::num::NonZeroU64::new(1).unwrap(),
                flags: vec![],
            },
        }
    }

    #[test]
    fn insert_get_invalidate() {
        let cache = MessageCache::new();
        let mbox = oryx_core::gen_ident();
        let uid = std::num::NonZeroU32::new(1).unwrap();
        assert!(cache.get(mbox, uid).is_none());
        cache.insert(mbox, uid, sample_result());
        assert!(cache.get(mbox, uid).is_some());
        cache.invalidate(mbox, uid);
        assert!(cache.get(mbox, uid).is_none());
    }

    #[test]
    fn shared_across_protocols_by_mailbox_then_uid() {
        let cache = MessageCache::new();
        let mbox = oryx_core::gen_ident();
        let uid = std::num::NonZeroU32::new(7).unwrap();
        cache.insert(mbox, uid, sample_result());
        // A POP-layer read through the same cache sees the IMAP-warmed entry.
        assert!(cache.get(mbox, uid).is_some());
        let other_mbox = oryx_core::gen_ident();
        assert!(cache.get(other_mbox, uid).is_none());
    }
}

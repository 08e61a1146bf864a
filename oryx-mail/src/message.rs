//! A message's staged population model: [`QueryResult`] only trusts the
//! fields matching the bit set it was populated to, so a FETCH that only
//! needs headers never pays for the body. Grounded on the teacher's
//! `src/mail/query.rs` `QueryScope`/`QueryResult` staging.

use oryx_core::UniqueIdent;

use crate::mail::uidindex::{Flag, ImapUid, ModSeq};

/// Per-message metadata kept alongside the body: internal date, raw
/// header block, the key used to encrypt/decrypt the body (opaque to
/// this crate; populated by the storage collaborator), and the
/// RFC822-rendered size used by FETCH RFC822.SIZE.
#[derive(Clone, Debug)]
pub struct MailMeta {
    pub internaldate: u64,
    pub headers: Vec<u8>,
    pub message_key: Vec<u8>,
    pub rfc822_size: usize,
}

impl MailMeta {
    /// Read-repair merge for two concurrently written copies of the same
    /// message metadata: keeps whichever claims the larger size, since a
    /// short write implies a crash mid-append.
    pub fn try_merge(&mut self, other: &MailMeta) {
        if other.rfc822_size > self.rfc822_size {
            *self = other.clone();
        }
    }
}

/// The index-entry view of a message: UID, modseq and flags, without
/// touching storage at all.
#[derive(Clone, Debug)]
pub struct IndexView {
    pub uuid: UniqueIdent,
    pub uid: ImapUid,
    pub modseq: ModSeq,
    pub flags: Vec<Flag>,
}

/// How much of a message has been populated. Each variant only exposes
/// the data it was fetched with — callers must match on the variant they
/// asked for rather than guessing whether deeper fields are present.
#[derive(Clone, Debug)]
pub enum QueryResult {
    IndexResult {
        index: IndexView,
    },
    PartialResult {
        index: IndexView,
        metadata: MailMeta,
    },
    FullResult {
        index: IndexView,
        metadata: MailMeta,
        content: Vec<u8>,
    },
}

impl QueryResult {
    pub fn uuid(&self) -> UniqueIdent {
        self.index().uuid
    }

    pub fn index(&self) -> &IndexView {
        match self {
            QueryResult::IndexResult { index }
            | QueryResult::PartialResult { index, .. }
            | QueryResult::FullResult { index, .. } => index,
        }
    }

    pub fn metadata(&self) -> Option<&MailMeta> {
        match self {
            QueryResult::IndexResult { .. } => None,
            QueryResult::PartialResult { metadata, .. }
            | QueryResult::FullResult { metadata, .. } => Some(metadata),
        }
    }

    pub fn content(&self) -> Option<&[u8]> {
        match self {
            QueryResult::FullResult { content, .. } => Some(content),
            _ => None,
        }
    }

    pub(crate) fn into_partial(self, metadata: MailMeta) -> QueryResult {
        match self {
            QueryResult::IndexResult { index } => QueryResult::PartialResult { index, metadata },
            other => other,
        }
    }

    pub(crate) fn into_full(self, content: Vec<u8>) -> QueryResult {
        match self {
            QueryResult::IndexResult { index } => QueryResult::FullResult {
                index,
                metadata: MailMeta {
                    internaldate: 0,
                    headers: vec![],
                    message_key: vec![],
                    rfc822_size: content.len(),
                },
                content,
            },
            QueryResult::PartialResult { index, metadata } => QueryResult::FullResult {
                index,
                metadata,
                content,
            },
            other @ QueryResult::FullResult { .. } => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> IndexView {
        IndexView {
            uuid: oryx_core::gen_ident(),
            uid: std::num::NonZeroU32::new(1).unwrap(),
            modseq: std::num::NonZeroU64::new(1).unwrap(),
            flags: vec![],
        }
    }

    #[test]
    fn staged_population_hides_unset_fields() {
        let r = QueryResult::IndexResult { index: index() };
        assert!(r.metadata().is_none());
        assert!(r.content().is_none());

        let r = r.into_partial(MailMeta {
            internaldate: 1,
            headers: vec![],
            message_key: vec![],
            rfc822_size: 10,
        });
        assert!(r.metadata().is_some());
        assert!(r.content().is_none());

        let r = r.into_full(b"hello".to_vec());
        assert_eq!(r.content(), Some(&b"hello"[..]));
    }

    #[test]
    fn merge_keeps_larger_copy() {
        let mut a = MailMeta {
            internaldate: 0,
            headers: vec![],
            message_key: vec![],
            rfc822_size: 5,
        };
        let b = MailMeta {
            internaldate: 0,
            headers: vec![9],
            message_key: vec![],
            rfc822_size: 50,
        };
        a.try_merge(&b);
        assert_eq!(a.rfc822_size, 50);
    }
}

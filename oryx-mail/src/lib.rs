//! Mailbox storage model: the UID index CRDT, message metadata staging,
//! the storage collaborator trait, and the process-wide caches shared
//! across sessions. Grounded on the teacher's `aero-collections` crate
//! (`src/mail/*`, `src/storage/*`).

pub mod cache;
pub mod group;
pub mod mail;
pub mod message;
pub mod snapshot;
pub mod storage;

pub use cache::{MessageCache, UnseenCache};
pub use group::MailboxGroup;
pub use oryx_core::UniqueIdent;
pub use mail::mailbox::Mailbox;
pub use mail::namespace::{
    CreatedMailbox, MailboxNamespace, ARCHIVE, DRAFTS, INBOX, MAILBOX_HIERARCHY_DELIMITER, SENT,
    TRASH,
};
pub use mail::uidindex::{Flag, ImapUid, ImapUidvalidity, ModSeq, UidIndex, UidIndexOp};
pub use message::{IndexView, MailMeta, QueryResult};
pub use snapshot::{FrozenMailbox, Query, QueryScope};
pub use storage::{Database, MemoryDatabase, StoreError};

//! Shared primitives used by Oryx's mail, certificate and protocol crates:
//! the compact [`message_set::MessageSet`] ordered integer set, the
//! [`patricia::PatriciaMap`] integer-keyed cache trie, and the process-wide
//! unique identifier / timestamp helpers in [`ident`] and [`time`].

pub mod ident;
pub mod message_set;
pub mod patricia;
pub mod time;

pub use ident::{gen_ident, UniqueIdent};
pub use message_set::MessageSet;
pub use patricia::PatriciaMap;

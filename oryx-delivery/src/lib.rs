//! Outbound SMTP delivery: the `DeliveryAgent`/`SpoolManager` pair that
//! drains the `deliveries`/`delivery_recipients` tables spec.md §3 and
//! §4.13 describe, a pooled outbound SMTP client, and DSN/bounce
//! construction. Grounded on spec.md §4.13 and the storage
//! collaborator shape SPEC_FULL.md §3.1 asks for; the teacher never
//! implemented outbound submission (`src/lmtp.rs` only receives), so
//! the wire-level client is new, written in the same raw-line-protocol
//! idiom `oryx-proto` uses elsewhere in this workspace.

pub mod agent;
pub mod dsn;
pub mod smtp;
pub mod spool;

pub use agent::{DeliveryAgent, DeliveryAgentConfig, SpoolManager};
pub use spool::{DeliveryRow, DeliveryStore, MemoryDeliveryStore, RecipientAction, RecipientRow, StoreError};

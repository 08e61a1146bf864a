//! Protocol front-ends binding `oryx-mail`/`oryx-user` to the wire:
//! IMAP4rev1 with CONDSTORE/ANNOTATE/URLAUTH/CATENATE/IDLE, and POP3
//! with STLS/SASL. Grounded on the teacher's `aero-proto` crate, with
//! the DAV/iCal/webmail surfaces it also carries dropped as out of
//! scope.

pub mod imap;
pub mod pop;
pub mod sasl;
pub mod user;

//! The IMAP session state machine (RFC 3501 §3): not-authenticated,
//! authenticated, selected and logout, plus the IDLE sub-state layered
//! on top of authenticated/selected. Grounded on the teacher's
//! `src/imap/flow.rs` `State`, generalized with the `Selected`/`Idle`
//! states and `Transition`/`apply()` shape its own `session.rs` and
//! `command/*.rs` call sites require.

use std::sync::Arc;

use anyhow::{bail, Result};
use imap_codec::imap_types::core::Tag;
use tokio::sync::Notify;

use crate::imap::mailbox_view::MailboxView;
use crate::user::User;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailboxPerm {
    ReadWrite,
    ReadOnly,
}

pub enum State {
    NotAuthenticated,
    Authenticated(Arc<User>),
    Selected(Arc<User>, MailboxView, MailboxPerm),
    Idle(Arc<User>, MailboxView, MailboxPerm, Tag<'static>, Arc<Notify>),
    Logout,
}

pub enum Transition {
    None,
    Authenticate(Arc<User>),
    Select(MailboxView, MailboxPerm),
    Unselect,
    Idle(Tag<'static>, Notify),
    UnIdle,
    Logout,
}

// See RFC3501 section 3.
// https://datatracker.ietf.org/doc/html/rfc3501#page-13
impl State {
    pub fn apply(&mut self, tr: Transition) -> Result<()> {
        if matches!(tr, Transition::None) {
            return Ok(());
        }

        let prev = std::mem::replace(self, State::Logout);
        let next = match (prev, tr) {
            (prev, Transition::Logout) => Ok(State::Logout),
            (State::NotAuthenticated, Transition::Authenticate(user)) => {
                Ok(State::Authenticated(user))
            }
            (State::Authenticated(user), Transition::Select(mailbox, perm)) => {
                Ok(State::Selected(user, mailbox, perm))
            }
            (State::Selected(user, ..), Transition::Select(mailbox, perm)) => {
                Ok(State::Selected(user, mailbox, perm))
            }
            (State::Selected(user, ..), Transition::Unselect) => Ok(State::Authenticated(user)),
            (State::Selected(user, mailbox, perm), Transition::Idle(tag, stop)) => {
                Ok(State::Idle(user, mailbox, perm, tag, Arc::new(stop)))
            }
            (State::Idle(user, mailbox, perm, ..), Transition::UnIdle) => {
                Ok(State::Selected(user, mailbox, perm))
            }
            (prev, _) => Err((prev, "illegal IMAP state transition")),
        };

        match next {
            Ok(state) => {
                *self = state;
                Ok(())
            }
            Err((prev, msg)) => {
                *self = prev;
                bail!("{}", msg);
            }
        }
    }

    pub fn notify(&self) -> Option<Arc<Notify>> {
        match self {
            State::Idle(_, _, _, _, stop) => Some(stop.clone()),
            _ => None,
        }
    }
}

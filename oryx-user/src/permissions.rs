//! The permissions subsystem referenced by spec.md §4.11 (SELECT
//! acquires Read permission) and §4.12 (the URL fetcher aggregates
//! required Read permissions across mailboxes into one checker before
//! doing any fetch work). Grounded on the shape those two sections
//! describe rather than on a single teacher file, since the teacher's
//! ACL model was folded into its Garage/K2V bucket ownership and is out
//! of scope here.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Right {
    Read,
    ReadWrite,
}

impl Right {
    fn satisfies(self, required: Right) -> bool {
        self >= required
    }
}

#[derive(Debug, Error)]
#[error("missing {required:?} permission on mailbox {mailbox:?}")]
pub struct PermissionError {
    pub mailbox: String,
    pub required: Right,
}

/// A user's granted rights, one entry per mailbox namespace path.
/// Absence of an entry means no access.
#[derive(Debug, Clone, Default)]
pub struct Grants(HashMap<String, Right>);

impl Grants {
    pub fn new() -> Self {
        Grants(HashMap::new())
    }

    pub fn grant(&mut self, mailbox: impl Into<String>, right: Right) {
        self.0.insert(mailbox.into(), right);
    }

    pub fn right_for(&self, mailbox: &str) -> Option<Right> {
        self.0.get(mailbox).copied()
    }
}

/// Aggregates the Read permissions required across a batch of mailboxes
/// (per spec.md §4.12 step 3: "Aggregates required Read permissions for
/// all referenced mailboxes into one PermissionsChecker") so the URL
/// fetcher can validate the whole batch in one pass before it fetches
/// anything.
#[derive(Debug, Default)]
pub struct PermissionsChecker {
    required: HashMap<String, Right>,
}

impl PermissionsChecker {
    pub fn new() -> Self {
        PermissionsChecker {
            required: HashMap::new(),
        }
    }

    /// Records that `mailbox` must be accessible with at least `right`,
    /// upgrading any previously recorded requirement for the same
    /// mailbox rather than downgrading it.
    pub fn require(&mut self, mailbox: impl Into<String>, right: Right) {
        let mailbox = mailbox.into();
        self.required
            .entry(mailbox)
            .and_modify(|r| {
                if right > *r {
                    *r = right;
                }
            })
            .or_insert(right);
    }

    pub fn check(&self, grants: &Grants) -> Result<(), PermissionError> {
        for (mailbox, required) in &self.required {
            match grants.right_for(mailbox) {
                Some(granted) if granted.satisfies(*required) => {}
                _ => {
                    return Err(PermissionError {
                        mailbox: mailbox.clone(),
                        required: *required,
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_satisfies_read_requirement() {
        let mut grants = Grants::new();
        grants.grant("INBOX", Right::ReadWrite);
        let mut checker = PermissionsChecker::new();
        checker.require("INBOX", Right::Read);
        assert!(checker.check(&grants).is_ok());
    }

    #[test]
    fn missing_mailbox_fails() {
        let grants = Grants::new();
        let mut checker = PermissionsChecker::new();
        checker.require("INBOX", Right::Read);
        assert!(checker.check(&grants).is_err());
    }

    #[test]
    fn read_only_grant_rejects_readwrite_requirement() {
        let mut grants = Grants::new();
        grants.grant("INBOX", Right::Read);
        let mut checker = PermissionsChecker::new();
        checker.require("INBOX", Right::ReadWrite);
        assert!(checker.check(&grants).is_err());
    }

    #[test]
    fn requirement_upgrade_keeps_the_stronger_right() {
        let mut checker = PermissionsChecker::new();
        checker.require("INBOX", Right::Read);
        checker.require("INBOX", Right::ReadWrite);
        let mut grants = Grants::new();
        grants.grant("INBOX", Right::Read);
        assert!(checker.check(&grants).is_err());
    }
}

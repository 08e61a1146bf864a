//! An authenticated user's view of their mailbox namespace. Grounded on
//! the teacher's `aero-collections/user.rs` `User`, trimmed of its
//! K2V-backed `storage::Store`/process-wide `USER_CACHE`/incoming-mail
//! watch channel (those are out of scope here: mailbox persistence goes
//! through [`oryx_mail::Database`] directly, and there is one `User` per
//! IMAP/POP3 session rather than a shared weak-ref cache).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use anyhow::{anyhow, bail, Result};

use oryx_mail::{
    CreatedMailbox, Mailbox, MailboxNamespace, UniqueIdent, ARCHIVE, DRAFTS, INBOX,
    MAILBOX_HIERARCHY_DELIMITER, SENT, TRASH,
};
use oryx_user::Credentials;

pub struct User {
    pub username: String,
    pub creds: Credentials,
    db: Arc<dyn oryx_mail::Database>,
    mailboxes: Mutex<HashMap<UniqueIdent, Weak<Mailbox>>>,
}

impl User {
    pub async fn new(creds: Credentials, db: Arc<dyn oryx_mail::Database>) -> Result<Arc<Self>> {
        let user = Arc::new(Self {
            username: creds.username.clone(),
            creds,
            db,
            mailboxes: Mutex::new(HashMap::new()),
        });
        user.load_namespace().await?;
        Ok(user)
    }

    /// Lists the user's mailboxes.
    pub async fn list_mailboxes(&self) -> Result<Vec<String>> {
        let ns = self.load_namespace().await?;
        Ok(ns.existing_mailbox_names())
    }

    pub async fn has_mailbox(&self, name: &str) -> Result<bool> {
        let ns = self.load_namespace().await?;
        Ok(ns.has_mailbox(name))
    }

    /// Opens an existing mailbox given its IMAP name, `None` if it does
    /// not exist in this user's namespace.
    pub async fn open_mailbox(&self, name: &str) -> Result<Option<Arc<Mailbox>>> {
        let ns = self.load_namespace().await?;
        match ns.get_mailbox(name) {
            Some((id, _uidvalidity)) => Ok(Some(self.open_mailbox_by_id(id).await?)),
            None => Ok(None),
        }
    }

    pub async fn create_mailbox(&self, name: &str) -> Result<()> {
        if name.ends_with(MAILBOX_HIERARCHY_DELIMITER) {
            bail!("Invalid mailbox name: {}", name);
        }
        let mut ns = self.load_namespace().await?;
        match ns.create_mailbox(name) {
            CreatedMailbox::Created(..) => {
                self.save_namespace(&ns).await?;
                Ok(())
            }
            CreatedMailbox::Existed(..) => Err(anyhow!("Mailbox {} already exists", name)),
        }
    }

    pub async fn delete_mailbox(&self, name: &str) -> Result<()> {
        if name == INBOX {
            bail!("Cannot delete INBOX");
        }
        let mut ns = self.load_namespace().await?;
        if !ns.has_mailbox(name) {
            bail!("Mailbox {} does not exist", name);
        }
        ns.set_mailbox(name, None);
        self.save_namespace(&ns).await
    }

    pub async fn rename_mailbox(&self, old_name: &str, new_name: &str) -> Result<()> {
        if old_name.ends_with(MAILBOX_HIERARCHY_DELIMITER) {
            bail!("Invalid mailbox name: {}", old_name);
        }
        if new_name.ends_with(MAILBOX_HIERARCHY_DELIMITER) {
            bail!("Invalid mailbox name: {}", new_name);
        }

        let mut ns = self.load_namespace().await?;
        if old_name == INBOX {
            ns.rename_mailbox(old_name, new_name)?;
            self.ensure_inbox_exists(&mut ns);
            self.save_namespace(&ns).await?;
        } else {
            let names = ns.existing_mailbox_names();
            let old_prefix = format!("{}{}", old_name, MAILBOX_HIERARCHY_DELIMITER);
            let new_prefix = format!("{}{}", new_name, MAILBOX_HIERARCHY_DELIMITER);

            if names
                .iter()
                .any(|x| x == new_name || x.starts_with(&new_prefix))
            {
                bail!("Mailbox {} already exists", new_name);
            }

            for name in names.iter() {
                if name == old_name {
                    ns.rename_mailbox(name, new_name)?;
                } else if let Some(tail) = name.strip_prefix(&old_prefix) {
                    ns.rename_mailbox(name, &format!("{}{}", new_prefix, tail))?;
                }
            }
            self.save_namespace(&ns).await?;
        }
        Ok(())
    }

    // ---- internals ----

    async fn open_mailbox_by_id(&self, id: UniqueIdent) -> Result<Arc<Mailbox>> {
        {
            let cache = self.mailboxes.lock().unwrap();
            if let Some(mb) = cache.get(&id).and_then(Weak::upgrade) {
                return Ok(mb);
            }
        }

        let mb = Mailbox::open(id, self.db.clone()).await?;

        let mut cache = self.mailboxes.lock().unwrap();
        if let Some(concurrent) = cache.get(&id).and_then(Weak::upgrade) {
            Ok(concurrent)
        } else {
            cache.insert(id, Arc::downgrade(&mb));
            Ok(mb)
        }
    }

    async fn load_namespace(&self) -> Result<MailboxNamespace> {
        let mut ns = self.db.load_namespace(&self.username).await?;

        let created_defaults = [DRAFTS, ARCHIVE, SENT, TRASH]
            .iter()
            .map(|mbx| ns.create_mailbox(mbx))
            .fold(false, |acc, r| acc || matches!(r, CreatedMailbox::Created(..)));
        let created_inbox = self.ensure_inbox_exists(&mut ns);

        if created_defaults || created_inbox {
            self.save_namespace(&ns).await?;
        }

        Ok(ns)
    }

    fn ensure_inbox_exists(&self, ns: &mut MailboxNamespace) -> bool {
        matches!(ns.create_mailbox(INBOX), CreatedMailbox::Created(..))
    }

    async fn save_namespace(&self, ns: &MailboxNamespace) -> Result<()> {
        Ok(self.db.save_namespace(&self.username, ns).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oryx_mail::MemoryDatabase;
    use oryx_user::Grants;

    fn creds(username: &str) -> Credentials {
        Credentials {
            username: username.into(),
            master_key: None,
            grants: Grants::default(),
        }
    }

    #[tokio::test]
    async fn opening_a_user_creates_default_mailboxes() {
        let db: Arc<dyn oryx_mail::Database> = Arc::new(MemoryDatabase::new());
        let user = User::new(creds("alice"), db).await.unwrap();
        let names = user.list_mailboxes().await.unwrap();
        for expected in [INBOX, DRAFTS, ARCHIVE, SENT, TRASH] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn create_open_rename_delete_roundtrip() {
        let db: Arc<dyn oryx_mail::Database> = Arc::new(MemoryDatabase::new());
        let user = User::new(creds("bob"), db).await.unwrap();

        user.create_mailbox("Projects").await.unwrap();
        assert!(user.open_mailbox("Projects").await.unwrap().is_some());

        user.rename_mailbox("Projects", "Archive.Projects")
            .await
            .unwrap();
        assert!(user.open_mailbox("Projects").await.unwrap().is_none());
        assert!(user
            .open_mailbox("Archive.Projects")
            .await
            .unwrap()
            .is_some());

        user.delete_mailbox("Archive.Projects").await.unwrap();
        assert!(user.open_mailbox("Archive.Projects").await.unwrap().is_none());

        assert!(user.delete_mailbox(INBOX).await.is_err());
    }
}

pub mod anonymous;
pub mod anystate;
pub mod authenticated;
pub mod selected;

use imap_codec::imap_types::mailbox::Mailbox as MailboxCodec;
use oryx_mail::INBOX;

/// Converts an IMAP mailbox name/identifier representation to the UTF-8
/// string used internally.
pub struct MailboxName<'a>(pub &'a MailboxCodec<'a>);
impl<'a> TryInto<&'a str> for MailboxName<'a> {
    type Error = std::str::Utf8Error;
    fn try_into(self) -> Result<&'a str, Self::Error> {
        match self.0 {
            MailboxCodec::Inbox => Ok(INBOX),
            MailboxCodec::Other(aname) => Ok(std::str::from_utf8(aname.as_ref())?),
        }
    }
}

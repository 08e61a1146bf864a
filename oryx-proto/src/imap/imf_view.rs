//! Builds an IMAP ENVELOPE from a parsed Internet Message Format header
//! block. Ported near-verbatim from the teacher's `src/imap/imf_view.rs`
//! (RFC 3501 §7.4.2 envelope rules).

use anyhow::{anyhow, Result};
use chrono::naive::NaiveDate;

use imap_codec::imap_types::core::{IString, NString};
use imap_codec::imap_types::envelope::{Address, Envelope};

use eml_codec::imf;

pub struct ImfView<'a>(pub &'a imf::Imf<'a>);

impl<'a> ImfView<'a> {
    pub fn naive_date(&self) -> Result<NaiveDate> {
        Ok(self.0.date.ok_or(anyhow!("date is not set"))?.date_naive())
    }

    /// If the Sender or Reply-To lines are absent, or present but
    /// empty, the corresponding envelope member falls back to `from`
    /// (RFC 3501 §7.4.2): `from` itself can never be NIL since RFC 2822
    /// requires a valid From header.
    pub fn message_envelope(&self) -> Envelope<'static> {
        message_envelope(self.0)
    }
}

/// Free-function form of [`ImfView::message_envelope`], used where no
/// `ImfView` wrapper is otherwise needed.
pub fn message_envelope(msg: &imf::Imf) -> Envelope<'static> {
    let from = msg.from.iter().map(convert_mbx).collect::<Vec<_>>();

    Envelope {
        date: NString(
            msg.date
                .as_ref()
                .map(|d| IString::try_from(d.to_rfc3339()).unwrap()),
        ),
        subject: NString(
            msg.subject
                .as_ref()
                .map(|d| IString::try_from(d.to_string()).unwrap()),
        ),
        sender: msg
            .sender
            .as_ref()
            .map(|v| vec![convert_mbx(v)])
            .unwrap_or(from.clone()),
        reply_to: if msg.reply_to.is_empty() {
            from.clone()
        } else {
            convert_addresses(&msg.reply_to)
        },
        from,
        to: convert_addresses(&msg.to),
        cc: convert_addresses(&msg.cc),
        bcc: convert_addresses(&msg.bcc),
        in_reply_to: NString(
            msg.in_reply_to
                .iter()
                .next()
                .map(|d| IString::try_from(d.to_string()).unwrap()),
        ),
        message_id: NString(
            msg.msg_id
                .as_ref()
                .map(|d| IString::try_from(d.to_string()).unwrap()),
        ),
    }
}

pub fn convert_addresses(addrlist: &Vec<imf::address::AddressRef>) -> Vec<Address<'static>> {
    let mut acc = vec![];
    for item in addrlist {
        match item {
            imf::address::AddressRef::Single(a) => acc.push(convert_mbx(a)),
            imf::address::AddressRef::Many(l) => acc.extend(l.participants.iter().map(convert_mbx)),
        }
    }
    acc
}

pub fn convert_mbx(addr: &imf::mailbox::MailboxRef) -> Address<'static> {
    Address {
        name: NString(
            addr.name
                .as_ref()
                .map(|x| IString::try_from(x.to_string()).unwrap()),
        ),
        // SMTP at-domain-list (source route) has been obsolete since
        // at least 1991.
        adl: NString(None),
        mailbox: NString(Some(
            IString::try_from(addr.addrspec.local_part.to_string()).unwrap(),
        )),
        host: NString(Some(
            IString::try_from(addr.addrspec.domain.to_string()).unwrap(),
        )),
    }
}

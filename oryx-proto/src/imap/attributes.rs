//! Turns the macro/attribute list a FETCH command carries into a flat,
//! expanded attribute list plus the derived yes/no questions the rest
//! of the FETCH pipeline asks about it (does it need the body, does it
//! imply CONDSTORE). Ported near-verbatim from the teacher's
//! `src/imap/attributes.rs`.

use imap_codec::imap_types::command::FetchModifier;
use imap_codec::imap_types::fetch::{MacroOrMessageDataItemNames, MessageDataItemName, Section};

pub struct AttributesProxy {
    pub attrs: Vec<MessageDataItemName<'static>>,
}

impl AttributesProxy {
    pub fn new(
        attrs: &MacroOrMessageDataItemNames<'static>,
        modifiers: &[FetchModifier],
        is_uid_fetch: bool,
    ) -> Self {
        let mut fetch_attrs = match attrs {
            MacroOrMessageDataItemNames::Macro(m) => {
                use imap_codec::imap_types::fetch::Macro;
                use MessageDataItemName::*;
                match m {
                    Macro::All => vec![Flags, InternalDate, Rfc822Size, Envelope],
                    Macro::Fast => vec![Flags, InternalDate, Rfc822Size],
                    Macro::Full => vec![Flags, InternalDate, Rfc822Size, Envelope, Body],
                    _ => {
                        tracing::error!("unimplemented macro");
                        vec![]
                    }
                }
            }
            MacroOrMessageDataItemNames::MessageDataItemNames(a) => a.clone(),
        };

        if is_uid_fetch && !fetch_attrs.contains(&MessageDataItemName::Uid) {
            fetch_attrs.push(MessageDataItemName::Uid);
        }

        let is_changed_since = modifiers
            .iter()
            .any(|m| matches!(m, FetchModifier::ChangedSince(..)));
        if is_changed_since && !fetch_attrs.contains(&MessageDataItemName::ModSeq) {
            fetch_attrs.push(MessageDataItemName::ModSeq);
        }

        Self { attrs: fetch_attrs }
    }

    pub fn is_enabling_condstore(&self) -> bool {
        self.attrs
            .iter()
            .any(|x| matches!(x, MessageDataItemName::ModSeq))
    }

    pub fn need_body(&self) -> bool {
        self.attrs.iter().any(|x| match x {
            MessageDataItemName::Body
            | MessageDataItemName::Rfc822
            | MessageDataItemName::Rfc822Text
            | MessageDataItemName::BodyStructure => true,

            MessageDataItemName::BodyExt {
                section: Some(section),
                partial: _,
                peek: _,
            } => match section {
                Section::Header(None)
                | Section::HeaderFields(None, _)
                | Section::HeaderFieldsNot(None, _) => false,
                _ => true,
            },
            MessageDataItemName::BodyExt { .. } => true,
            _ => false,
        })
    }
}

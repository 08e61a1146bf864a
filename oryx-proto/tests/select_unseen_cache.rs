//! Exercises SELECT's mailbox summary and its FirstUnseen cache:
//! a mailbox with messages at UIDs {1,2,3}, `\Seen` on {1}, then a
//! second SELECT of the same mailbox with no intervening change.

use std::sync::Arc;

use anyhow::Result;
use imap_codec::imap_types::response::{Code, Data, Status};

use oryx_mail::{Database, MailMeta, Mailbox, MemoryDatabase, UnseenCache};
use oryx_proto::imap::mailbox_view::MailboxView;
use oryx_proto::imap::response::Body;

fn meta(size: usize) -> MailMeta {
    MailMeta {
        internaldate: 0,
        headers: vec![],
        message_key: vec![],
        rfc822_size: size,
    }
}

#[tokio::test]
async fn select_reports_exists_recent_uidvalidity_unseen_uidnext() -> Result<()> {
    let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let mailbox_id = oryx_core::gen_ident();
    let mbox = Mailbox::open(mailbox_id, db).await?;

    mbox.append(meta(1), b"one".to_vec(), vec!["\\Seen".to_string()])
        .await?;
    mbox.append(meta(1), b"two".to_vec(), vec![]).await?;
    mbox.append(meta(1), b"three".to_vec(), vec![]).await?;

    let unseen_cache = Arc::new(UnseenCache::new());
    let view = MailboxView::new(mbox.clone(), false, unseen_cache.clone()).await;
    let summary = view.summary()?;

    assert!(summary
        .iter()
        .any(|b| matches!(b, Body::Data(Data::Exists(3)))));
    assert!(summary
        .iter()
        .any(|b| matches!(b, Body::Data(Data::Recent(0)))));
    assert!(summary.iter().any(|b| matches!(
        b,
        Body::Status(Status::Ok {
            code: Some(Code::UidValidity(_)),
            ..
        })
    )));
    assert!(summary.iter().any(|b| matches!(
        b,
        Body::Status(Status::Ok {
            code: Some(Code::UidNext(_)),
            ..
        })
    )));
    assert!(summary.iter().any(|b| matches!(
        b,
        Body::Status(Status::Ok {
            code: Some(Code::Unseen(uid)),
            ..
        }) if uid.get() == 2
    )));

    // The re-SELECT below doesn't change the mailbox, so nextModSeq is
    // unchanged: the cache already holds the answer before summary() runs.
    let modseq = view.internal.snapshot.highestmodseq;
    assert!(unseen_cache.get(mailbox_id, modseq).is_some());

    let second_view = MailboxView::new(mbox, false, unseen_cache.clone()).await;
    assert_eq!(second_view.internal.snapshot.highestmodseq, modseq);
    let second_summary = second_view.summary()?;
    assert!(second_summary.iter().any(|b| matches!(
        b,
        Body::Status(Status::Ok {
            code: Some(Code::Unseen(uid)),
            ..
        }) if uid.get() == 2
    )));

    Ok(())
}

//! DSN (`multipart/report`, RFC 3462/3464) construction. Grounded on
//! spec.md §4.13 step 3/7: "Build a DSN: sender, each recipient with
//! current action/status/lastAttempt" and the bounce-injection rule
//! for a non-bounce delivery with any `Failed` recipient.

use chrono::Utc;

use crate::spool::{DeliveryRow, RecipientAction, RecipientRow};

/// The null sender (`<>`), per RFC 3464: bounces are always sent with
/// an empty MAIL FROM, and a delivery already addressed to it never
/// bounces again (spec.md's "sender is not the null sender" guard).
pub const NULL_SENDER: &str = "";

fn action_status_code(action: RecipientAction) -> &'static str {
    match action {
        RecipientAction::Delivered => "2.1.5",
        RecipientAction::Relayed => "2.1.5",
        RecipientAction::Expanded => "2.1.5",
        RecipientAction::Failed => "5.1.1",
        RecipientAction::Delayed => "4.4.1",
        RecipientAction::Unknown => "4.2.0",
    }
}

fn action_name(action: RecipientAction) -> &'static str {
    match action {
        RecipientAction::Delivered => "delivered",
        RecipientAction::Relayed => "relayed",
        RecipientAction::Expanded => "expanded",
        RecipientAction::Failed => "failed",
        RecipientAction::Delayed => "delayed",
        RecipientAction::Unknown => "unknown",
    }
}

fn per_recipient_block(r: &RecipientRow) -> String {
    format!(
        "Final-Recipient: rfc822; {}\r\nAction: {}\r\nStatus: {}\r\nDiagnostic-Code: smtp; {}\r\n",
        r.address,
        action_name(r.action),
        action_status_code(r.action),
        if r.status_text.is_empty() {
            "no diagnostic available"
        } else {
            r.status_text.as_str()
        },
    )
}

/// Builds a `multipart/report; report-type=delivery-status` MIME
/// message reporting the current status of every recipient in `row`,
/// to be handed to the bounce address. Returns the fully rendered
/// RFC 5322 message.
pub fn build_bounce(row: &DeliveryRow, reporting_mta: &str) -> Vec<u8> {
    let boundary = format!("oryx-dsn-{}", row.id);
    let now = Utc::now().to_rfc2822();

    let human_part = format!(
        "This is the mail delivery agent at {reporting_mta}.\r\n\r\n\
         Delivery of the following message has failed permanently for\r\n\
         one or more recipients:\r\n\r\n{}\r\n",
        row.recipients
            .iter()
            .filter(|r| r.action == RecipientAction::Failed)
            .map(|r| format!("  {} ({})", r.address, r.status_text))
            .collect::<Vec<_>>()
            .join("\r\n")
    );

    let machine_part = format!(
        "Reporting-MTA: dns; {reporting_mta}\r\nArrival-Date: {now}\r\n\r\n{}",
        row.recipients
            .iter()
            .map(per_recipient_block)
            .collect::<Vec<_>>()
            .join("\r\n")
    );

    let original_part_header = "Content-Type: message/rfc822\r\n\r\n";

    format!(
        "From: Mail Delivery System <MAILER-DAEMON@{reporting_mta}>\r\n\
         To: {}\r\n\
         Subject: Undelivered Mail Returned to Sender\r\n\
         Date: {now}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/report; report-type=delivery-status;\r\n\
         \tboundary=\"{boundary}\"\r\n\r\n\
         --{boundary}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n\
         {human_part}\r\n\
         --{boundary}\r\n\
         Content-Type: message/delivery-status\r\n\r\n\
         {machine_part}\r\n\
         --{boundary}\r\n\
         {original_part_header}{}\r\n\
         --{boundary}--\r\n",
        row.sender.as_deref().unwrap_or(NULL_SENDER),
        String::from_utf8_lossy(&row.message),
    )
    .into_bytes()
}

/// Builds a fresh `DeliveryRow` for the bounce itself: addressed to the
/// original sender, with the null sender as its own sender so it can
/// never recursively bounce.
pub fn bounce_row(
    original: &DeliveryRow,
    reporting_mta: &str,
    new_id: oryx_core::UniqueIdent,
    expires_at: chrono::DateTime<Utc>,
) -> Option<DeliveryRow> {
    let target = original.sender.clone()?;
    if target.is_empty() {
        // Never bounce a delivery that was already addressed to the null sender.
        return None;
    }

    Some(DeliveryRow {
        id: new_id,
        message: build_bounce(original, reporting_mta),
        sender: Some(NULL_SENDER.to_string()),
        recipients: vec![RecipientRow::pending(target)],
        expires_at,
        tried_at: None,
        delivered: false,
        is_bounce: true,
    })
}

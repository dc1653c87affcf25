// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

/// Subject phrases that mark a message as a non-delivery report. Matched as
/// substrings of the normalized subject, so provider decorations around them
/// do not matter.
pub const NDR_SUBJECT_MARKERS: [&str; 13] = [
    "undeliverable",
    "undelivered mail",
    "delivery status notification",
    "delivery has failed",
    "delivery failure",
    "delivery incomplete",
    "failure notice",
    "failed delivery",
    "mail delivery failed",
    "returned mail",
    "returned to sender",
    "non-delivery",
    "could not be delivered",
];

/// System mailboxes that send NDRs. Exchange Online reports come from a
/// `microsoftexchange...@tenant.onmicrosoft.com` address rather than
/// postmaster.
pub const NDR_SENDER_MARKERS: [&str; 4] = [
    "postmaster@",
    "mailer-daemon@",
    "mailerdaemon@",
    "microsoftexchange",
];

/// Cheap pre-filter applied to every fetched inbox message before the full
/// parse: an NDR announces itself in the subject or comes from a system
/// mailbox.
pub fn is_ndr_shaped(subject: Option<&str>, from_address: Option<&str>) -> bool {
    if let Some(subject) = subject {
        let subject = normalize_subject(subject);
        if NDR_SUBJECT_MARKERS
            .iter()
            .any(|marker| subject.contains(marker))
        {
            return true;
        }
    }
    if let Some(from) = from_address {
        let from = from.trim().to_lowercase();
        if NDR_SENDER_MARKERS.iter().any(|marker| from.contains(marker)) {
            return true;
        }
    }
    false
}

fn normalize_subject(subject: &str) -> String {
    let subject = subject.trim().to_lowercase();
    let subject = subject
        .strip_prefix("fwd:")
        .or_else(|| subject.strip_prefix("fw:"))
        .unwrap_or(&subject)
        .trim();
    subject.split_whitespace().collect::<Vec<_>>().join(" ")
}

// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use regex::Regex;
use scraper::Html;
use std::sync::LazyLock;

use crate::modules::email::entity::BounceType;
use crate::modules::utils::truncate_chars;

pub const MAX_REASON_CHARS: usize = 500;

/// Returned when no diagnostic phrase could be extracted but the subject
/// itself says the message failed.
pub const GENERIC_BOUNCE_REASON: &str =
    "Delivery failed; the non-delivery report did not include a specific reason.";

/// What one non-delivery report told us. All fields are best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NdrReport {
    /// Failed recipient address, lowercased.
    pub recipient: Option<String>,
    /// Human-readable failure phrase, capped at 500 chars.
    pub reason: Option<String>,
    /// Subject of the email that bounced, recovered from the NDR subject.
    pub original_subject: Option<String>,
}

struct ExtractRule {
    /// Rule label, used by tests and trace logs.
    name: &'static str,
    pattern: Regex,
}

impl ExtractRule {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).unwrap(),
        }
    }
}

const EMAIL: &str = r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}";

/// Recipient extraction rules, most specific first. Provider phrasings beat
/// report headers, which beat any address-shaped fallback.
static RECIPIENT_RULES: LazyLock<Vec<ExtractRule>> = LazyLock::new(|| {
    vec![
        ExtractRule::new(
            "your-message-to",
            &format!(r"(?i)your message to\s+({EMAIL})\s+couldn['’]t be delivered"),
        ),
        ExtractRule::new(
            "message-to",
            &format!(r"(?i)message to\s+({EMAIL})\s+couldn['’]t be delivered"),
        ),
        ExtractRule::new(
            "couldnt-deliver-to",
            &format!(r"(?i)couldn['’]t deliver (?:the message |your message )?to\s+({EMAIL})"),
        ),
        ExtractRule::new(
            "report-header",
            &format!(r"(?im)^\s*(?:to|recipient|final-recipient)\s*:\s*(?:rfc822;\s*)?({EMAIL})"),
        ),
        ExtractRule::new("angle-bracketed", &format!(r"<({EMAIL})>")),
        ExtractRule::new("bare-address", &format!(r"({EMAIL})")),
    ]
});

/// Failure-reason extraction rules, most specific first.
static REASON_RULES: LazyLock<Vec<ExtractRule>> = LazyLock::new(|| {
    vec![
        ExtractRule::new(
            "wasnt-found-at",
            r"(?i)(\S+\s+wasn['’]t found at\s+[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*)",
        ),
        ExtractRule::new(
            "mailbox-state",
            r"(?i)((?:recipient'?s\s+)?mailbox\s+(?:is\s+)?(?:full|unavailable|disabled|inactive|not found)[^.\r\n]*)",
        ),
        ExtractRule::new(
            "quota",
            r"(?i)((?:over|exceeded(?:\s+its)?)\s+(?:storage\s+)?quota[^.\r\n]*|quota exceeded[^.\r\n]*)",
        ),
        ExtractRule::new(
            "access-denied",
            r"(?i)(access denied[^.\r\n]*|(?:message\s+)?(?:blocked|rejected)\s+(?:by|due to)[^.\r\n]*)",
        ),
        ExtractRule::new(
            "smtp-status-line",
            r"(?m)([45]\d{2}[ \-]\d\.\d{1,3}\.\d{1,3}[^\r\n]*)",
        ),
    ]
});

/// NDR subject prefixes that wrap the original subject.
static SUBJECT_PREFIXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^undeliverable\s*:\s*(.+)$").unwrap(),
        Regex::new(r"(?i)^undelivered mail returned to sender\s*:\s*(.+)$").unwrap(),
        Regex::new(r"(?i)^delivery (?:status notification|has failed)[^:]*:\s*(.+)$").unwrap(),
        Regex::new(r"(?i)^mail delivery failed[^:]*:\s*(.+)$").unwrap(),
        Regex::new(r"(?i)^failure notice\s*:\s*(.+)$").unwrap(),
    ]
});

static BOUNCEY_SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)undeliver|delivery (?:status|failure|has failed)|failure notice|returned to sender")
        .unwrap()
});

/// Transient phrasings: the address is fine, the mailbox or server is not.
const SOFT_MARKERS: &[&str] = &[
    "mailbox full",
    "mailbox is full",
    "over quota",
    "quota exceeded",
    "exceeded its quota",
    "exceeded storage",
    "insufficient storage",
    "try again later",
    "temporarily",
    "temporary",
    "greylist",
    "throttl",
    "too many messages",
    "server busy",
];

static SMTP_4XX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b4\d{2}[ \-]4\.\d{1,3}\.\d{1,3}").unwrap());

/// Extracts (recipient, reason, original subject) from one NDR.
///
/// The body is HTML-stripped to plain text first, then each ordered rule
/// table is tried first-match-wins. Pure; both reconciliation passes and the
/// tests share it.
pub fn parse_ndr(subject: Option<&str>, body: Option<&str>) -> NdrReport {
    let text = body.map(to_plain_text).unwrap_or_default();

    let recipient = first_capture(&RECIPIENT_RULES, &text).map(|r| r.to_lowercase());

    let mut reason = first_capture(&REASON_RULES, &text);
    if reason.is_none() {
        if let Some(subject) = subject {
            if BOUNCEY_SUBJECT.is_match(subject) {
                reason = Some(GENERIC_BOUNCE_REASON.to_string());
            }
        }
    }
    let reason = reason.map(|r| truncate_chars(r.trim(), MAX_REASON_CHARS));

    let original_subject = subject.and_then(extract_original_subject);

    NdrReport {
        recipient,
        reason,
        original_subject,
    }
}

/// Hard unless the reason reads as transient.
pub fn classify_bounce(reason: &str) -> BounceType {
    let lowered = reason.to_lowercase();
    if SOFT_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return BounceType::Soft;
    }
    if SMTP_4XX.is_match(&lowered) {
        return BounceType::Soft;
    }
    BounceType::Hard
}

fn first_capture(rules: &[ExtractRule], text: &str) -> Option<String> {
    for rule in rules.iter() {
        if let Some(captures) = rule.pattern.captures(text) {
            if let Some(capture) = captures.get(1) {
                tracing::trace!(rule = rule.name, "NDR rule matched");
                return Some(capture.as_str().to_string());
            }
        }
    }
    None
}

fn extract_original_subject(subject: &str) -> Option<String> {
    let subject = subject.trim();
    for prefix in SUBJECT_PREFIXES.iter() {
        if let Some(captures) = prefix.captures(subject) {
            let original = captures[1].trim();
            if !original.is_empty() {
                return Some(original.to_string());
            }
        }
    }
    None
}

static HTML_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:html|head|body|div|p|br|span|table|td|tr|a|b|i|u|strong|em|img|font|h[1-6]|ul|ol|li|style|meta)\b").unwrap()
});

/// Flattens report HTML into plain text; already-plain bodies pass through
/// with entities decoded. Line breaks are preserved either way because the
/// header-style rules anchor on line starts, and a plain-text
/// `<bob@acme.com>` must not be mistaken for markup.
fn to_plain_text(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let text = if HTML_MARKUP.is_match(trimmed) {
        let document = Html::parse_document(trimmed);
        document.root_element().text().collect::<Vec<_>>().join("\n")
    } else {
        html_escape::decode_html_entities(trimmed).into_owned()
    };
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFICE_NDR_BODY: &str = r#"
        <html><body>
        <p>Your message to <b>jane@acme.com</b> couldn't be delivered.</p>
        <p>jane wasn't found at acme.com.</p>
        <p>Office 365 &mdash; postmaster</p>
        </body></html>"#;

    #[test]
    fn parses_provider_ndr_end_to_end() {
        let report = parse_ndr(Some("Undeliverable: Quarterly report"), Some(OFFICE_NDR_BODY));
        assert_eq!(report.recipient.as_deref(), Some("jane@acme.com"));
        assert_eq!(
            report.reason.as_deref(),
            Some("jane wasn't found at acme.com")
        );
        assert_eq!(report.original_subject.as_deref(), Some("Quarterly report"));
    }

    #[test]
    fn provider_phrasing_beats_report_headers() {
        let body = "Delivery has failed.\n\
                    To: someoneelse@other.example\n\
                    Your message to jane@acme.com couldn't be delivered.";
        let report = parse_ndr(None, Some(body));
        assert_eq!(report.recipient.as_deref(), Some("jane@acme.com"));
    }

    #[test]
    fn report_header_beats_angle_bracket_fallback() {
        let body = "Final-Recipient: rfc822; bob@acme.com\nOriginal sender <sales@corp.io>";
        let report = parse_ndr(None, Some(body));
        assert_eq!(report.recipient.as_deref(), Some("bob@acme.com"));
    }

    #[test]
    fn angle_bracketed_address_is_found() {
        let report = parse_ndr(None, Some("delivery to the following failed: <Bob@Acme.COM>"));
        assert_eq!(report.recipient.as_deref(), Some("bob@acme.com"));
    }

    #[test]
    fn smtp_status_line_becomes_reason() {
        let body = "Remote server returned an error.\n550 5.1.10 RESOLVER.ADR.RecipientNotFound; recipient not found";
        let report = parse_ndr(None, Some(body));
        let reason = report.reason.unwrap();
        assert!(reason.starts_with("550 5.1.10"));
    }

    #[test]
    fn bouncey_subject_yields_generic_reason_when_body_is_opaque() {
        let report = parse_ndr(
            Some("Delivery Status Notification (Failure)"),
            Some("<html><body><img src='x.png'/></body></html>"),
        );
        assert_eq!(report.reason.as_deref(), Some(GENERIC_BOUNCE_REASON));
    }

    #[test]
    fn ordinary_subject_yields_no_reason() {
        let report = parse_ndr(Some("Re: Quarterly report"), Some("Thanks, looks good!"));
        assert_eq!(report.reason, None);
        assert_eq!(report.original_subject, None);
    }

    #[test]
    fn reason_is_truncated() {
        let body = format!("Access denied{}", "x".repeat(600));
        let report = parse_ndr(None, Some(&body));
        assert_eq!(report.reason.unwrap().chars().count(), MAX_REASON_CHARS);
    }

    #[test]
    fn subject_prefixes_unwrap_the_original() {
        assert_eq!(
            extract_original_subject("Undeliverable: Pricing follow-up"),
            Some("Pricing follow-up".to_string())
        );
        assert_eq!(
            extract_original_subject("Delivery Status Notification (Failure): Pricing"),
            Some("Pricing".to_string())
        );
        assert_eq!(extract_original_subject("Pricing follow-up"), None);
    }

    #[test]
    fn classification_reads_transience() {
        assert_eq!(classify_bounce("jane wasn't found at acme.com"), BounceType::Hard);
        assert_eq!(classify_bounce("550 5.1.10 recipient not found"), BounceType::Hard);
        assert_eq!(classify_bounce("The recipient's mailbox is full."), BounceType::Soft);
        assert_eq!(classify_bounce("452 4.2.2 over quota, try again later"), BounceType::Soft);
        assert_eq!(classify_bounce("Access denied by policy"), BounceType::Hard);
    }

    #[test]
    fn plain_text_bodies_pass_through() {
        let report = parse_ndr(None, Some("couldn't deliver to jane@acme.com"));
        assert_eq!(report.recipient.as_deref(), Some("jane@acme.com"));
    }
}

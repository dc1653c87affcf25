use chrono::DateTime;
use serde::{Deserialize, Serialize};

pub const FILE_ATTACHMENT_ODATA_TYPE: &str = "#microsoft.graph.fileAttachment";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SendMailRequest {
    pub message: OutgoingMessage,
    #[serde(rename = "saveToSentItems")]
    pub save_to_sent_items: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutgoingMessage {
    pub subject: String,
    pub body: MessageBody,
    #[serde(rename = "toRecipients")]
    pub to_recipients: Vec<Recipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<FileAttachment>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageBody {
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Recipient {
    #[serde(rename = "emailAddress")]
    pub email_address: EmailAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileAttachment {
    #[serde(rename = "@odata.type")]
    pub odata_type: String,
    pub name: String,
    #[serde(rename = "contentType")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Base64-encoded payload.
    #[serde(rename = "contentBytes")]
    pub content_bytes: String,
}

impl FileAttachment {
    pub fn new(name: String, content_type: Option<String>, content_bytes: String) -> Self {
        Self {
            odata_type: FILE_ATTACHMENT_ODATA_TYPE.into(),
            name,
            content_type,
            content_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageListResponse {
    #[serde(rename = "@odata.context")]
    pub context: Option<String>,

    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,

    pub value: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Message {
    pub id: String,
    #[serde(rename = "internetMessageId")]
    pub internet_message_id: Option<String>,
    pub subject: Option<String>,
    #[serde(rename = "receivedDateTime")]
    pub received_date_time: Option<String>,
    pub body: Option<MessageBody>,
    #[serde(rename = "bodyPreview")]
    pub body_preview: Option<String>,
    pub from: Option<Recipient>,
    #[serde(rename = "internetMessageHeaders")]
    pub internet_message_headers: Option<Vec<InternetMessageHeader>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InternetMessageHeader {
    pub name: String,
    pub value: String,
}

impl Message {
    /// Case-insensitive internet-header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.internet_message_headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.as_str())
        })
    }

    pub fn from_address(&self) -> Option<&str> {
        self.from
            .as_ref()
            .and_then(|r| r.email_address.address.as_deref())
    }

    /// Graph timestamps are ISO 8601 (`2025-08-20T12:34:56Z`); epoch millis or None.
    pub fn received_at_ms(&self) -> Option<i64> {
        self.received_date_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let message = Message {
            internet_message_headers: Some(vec![InternetMessageHeader {
                name: "In-Reply-To".into(),
                value: "<abc@mail.example>".into(),
            }]),
            ..Default::default()
        };
        assert_eq!(message.header("in-reply-to"), Some("<abc@mail.example>"));
        assert_eq!(message.header("References"), None);
    }

    #[test]
    fn received_at_parses_graph_timestamp() {
        let message = Message {
            received_date_time: Some("2025-08-20T12:00:00Z".into()),
            ..Default::default()
        };
        assert_eq!(message.received_at_ms(), Some(1755691200000));
    }

    #[test]
    fn send_request_serializes_graph_field_names() {
        let request = SendMailRequest {
            message: OutgoingMessage {
                subject: "Hello".into(),
                body: MessageBody {
                    content_type: "HTML".into(),
                    content: "<p>hi</p>".into(),
                },
                to_recipients: vec![Recipient {
                    email_address: EmailAddress {
                        name: None,
                        address: Some("jane@acme.com".into()),
                    },
                }],
                attachments: None,
            },
            save_to_sent_items: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["saveToSentItems"], true);
        assert_eq!(value["message"]["body"]["contentType"], "HTML");
        assert_eq!(
            value["message"]["toRecipients"][0]["emailAddress"]["address"],
            "jane@acme.com"
        );
        assert!(value["message"].get("attachments").is_none());
    }

    #[test]
    fn attachment_carries_odata_type() {
        let attachment = FileAttachment::new("report.pdf".into(), None, "aGVsbG8=".into());
        let value = serde_json::to_value(&attachment).unwrap();
        assert_eq!(value["@odata.type"], FILE_ATTACHMENT_ODATA_TYPE);
        assert_eq!(value["contentBytes"], "aGVsbG8=");
    }
}

//! Message types exchanged with the mailbox.

use std::collections::HashMap;
use std::path::PathBuf;

use mail_parser::{MessageParser, MimeHeaders};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::mail::text::strip_html;

/// A message as returned by the mailbox before parsing.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Mailbox-specific message id.
    pub id: String,
    /// Full RFC 822 bytes.
    pub bytes: Vec<u8>,
}

/// Kind of a body segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Plain,
    Html,
}

/// One body segment of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPart {
    pub text: String,
    pub kind: ContentKind,
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// An inbound message, immutable once built.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    id: String,
    sender: String,
    subject: String,
    body: Vec<BodyPart>,
    headers: HashMap<String, String>,
    attachments: Vec<Attachment>,
}

impl IncomingMessage {
    /// Build a plain-text message directly (console input, tests).
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            sender: sender.into(),
            subject: subject.into(),
            body: vec![BodyPart {
                text: body.into(),
                kind: ContentKind::Plain,
            }],
            headers: HashMap::new(),
            attachments: Vec::new(),
        }
    }

    /// Attach a file.
    pub fn with_attachment(mut self, filename: impl Into<String>, content: Vec<u8>) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            content,
        });
        self
    }

    /// Set the mailbox id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Parse a raw RFC 822 message and check it has a sender and a subject.
    pub fn from_raw(raw: &RawMessage) -> Result<Self, ValidationError> {
        let parsed = MessageParser::default()
            .parse(raw.bytes.as_slice())
            .ok_or_else(|| ValidationError::Unparseable { id: raw.id.clone() })?;

        let sender = resolve_sender(&parsed).ok_or_else(|| ValidationError::MissingSender {
            id: raw.id.clone(),
        })?;
        let subject = parsed
            .subject()
            .map(str::to_string)
            .ok_or_else(|| ValidationError::MissingSubject { id: raw.id.clone() })?;

        let mut body: Vec<BodyPart> = (0..)
            .map_while(|i| parsed.body_text(i))
            .map(|text| BodyPart {
                text: text.into_owned(),
                kind: ContentKind::Plain,
            })
            .collect();
        body.extend((0..).map_while(|i| parsed.body_html(i)).map(|html| BodyPart {
            text: html.into_owned(),
            kind: ContentKind::Html,
        }));

        let mut headers = HashMap::new();
        for (name, value) in parsed.headers_raw() {
            headers
                .entry(name.to_lowercase())
                .or_insert_with(|| value.trim().to_string());
        }

        let attachments = parsed
            .attachments()
            .filter_map(|part| {
                let filename = MimeHeaders::attachment_name(part)?;
                Some(Attachment {
                    filename: filename.to_string(),
                    content: part.contents().to_vec(),
                })
            })
            .collect();

        Ok(Self {
            id: raw.id.clone(),
            sender,
            subject,
            body,
            headers,
            attachments,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &[BodyPart] {
        &self.body
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Text of the first body segment; HTML-only messages are stripped to text.
    pub fn command_text(&self) -> String {
        match self.body.first() {
            Some(BodyPart {
                text,
                kind: ContentKind::Plain,
            }) => text.clone(),
            Some(BodyPart {
                text,
                kind: ContentKind::Html,
            }) => strip_html(text),
            None => String::new(),
        }
    }
}

/// `Sender` header first, then the first `From` address.
fn resolve_sender(parsed: &mail_parser::Message<'_>) -> Option<String> {
    parsed
        .sender()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .or_else(|| {
            parsed
                .from()
                .and_then(|addr| addr.first())
                .and_then(|a| a.address())
        })
        .map(str::trim)
        .filter(|a| a.contains('@'))
        .map(str::to_string)
}

/// A file to attach to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingAttachment {
    /// Read from disk at send time.
    Path(PathBuf),
    /// Already in memory.
    Bytes { filename: String, data: Vec<u8> },
}

impl OutgoingAttachment {
    /// File name shown to the recipient.
    pub fn filename(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "attachment".to_string()),
            Self::Bytes { filename, .. } => filename.clone(),
        }
    }
}

/// A reply built by a task handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingMessage {
    /// A reply addressed to the sender of `msg`.
    pub fn reply_to(
        msg: &IncomingMessage,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to: msg.sender().to_string(),
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: OutgoingAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Append a signature line to the body.
    pub fn with_footer(mut self, footer: &str) -> Self {
        if !self.body.is_empty() {
            self.body.push_str("\n\n");
        }
        self.body.push_str("-- \n");
        self.body.push_str(footer);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(text: &str) -> RawMessage {
        RawMessage {
            id: "42".into(),
            bytes: text.replace('\n', "\r\n").into_bytes(),
        }
    }

    #[test]
    fn parses_plain_message() {
        let msg = IncomingMessage::from_raw(&raw(
            "From: Alice <alice@example.com>\nTo: emalia@example.com\nSubject: files\n\nread [notes.txt]\n",
        ))
        .unwrap();

        assert_eq!(msg.id(), "42");
        assert_eq!(msg.sender(), "alice@example.com");
        assert_eq!(msg.subject(), "files");
        assert_eq!(msg.command_text().trim(), "read [notes.txt]");
        assert_eq!(msg.header("TO"), Some("emalia@example.com"));
        assert!(msg.attachments().is_empty());
    }

    #[test]
    fn sender_header_wins_over_from() {
        let msg = IncomingMessage::from_raw(&raw(
            "From: list@example.com\nSender: bob@example.com\nSubject: s\n\nhelp\n",
        ))
        .unwrap();
        assert_eq!(msg.sender(), "bob@example.com");
    }

    #[test]
    fn missing_sender_is_rejected() {
        let err = IncomingMessage::from_raw(&raw("Subject: orphan\n\nhelp\n")).unwrap_err();
        assert_eq!(err, ValidationError::MissingSender { id: "42".into() });
    }

    #[test]
    fn missing_subject_is_rejected() {
        let err = IncomingMessage::from_raw(&raw("From: a@example.com\n\nhelp\n")).unwrap_err();
        assert_eq!(err, ValidationError::MissingSubject { id: "42".into() });
    }

    #[test]
    fn parses_attachment() {
        let text = "From: a@example.com\n\
Subject: upload\n\
MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\n\
\n\
--XYZ\n\
Content-Type: text/plain\n\
\n\
write [uploads]\n\
--XYZ\n\
Content-Type: application/octet-stream\n\
Content-Disposition: attachment; filename=\"data.bin\"\n\
\n\
hello\n\
--XYZ--\n";
        let msg = IncomingMessage::from_raw(&raw(text)).unwrap();
        assert_eq!(msg.command_text().trim(), "write [uploads]");
        assert_eq!(msg.attachments().len(), 1);
        assert_eq!(msg.attachments()[0].filename, "data.bin");
        assert!(msg.attachments()[0].content.starts_with(b"hello"));
    }

    #[test]
    fn reply_goes_to_sender_with_footer() {
        let msg = IncomingMessage::new("alice@example.com", "hi", "help");
        let reply = OutgoingMessage::reply_to(&msg, "HELP", "menu").with_footer("email from Emalia");
        assert_eq!(reply.to, "alice@example.com");
        assert_eq!(reply.body, "menu\n\n-- \nemail from Emalia");
    }

    #[test]
    fn attachment_filename_from_path() {
        let a = OutgoingAttachment::Path(PathBuf::from("/tmp/report.csv"));
        assert_eq!(a.filename(), "report.csv");
    }
}

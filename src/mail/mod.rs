//! Mail layer: message types, the mailbox gateway and its IMAP/SMTP implementation.

pub mod gateway;
pub mod imap;
pub mod text;
pub mod types;

pub use gateway::{FlagAction, Mailbox, SEEN};
pub use imap::{ImapMailbox, MailboxConfig};
pub use types::{
    Attachment, BodyPart, ContentKind, IncomingMessage, OutgoingAttachment, OutgoingMessage,
    RawMessage,
};

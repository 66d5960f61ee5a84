//! Mailbox gateway contract: what the engine needs from a mail transport.

use async_trait::async_trait;

use crate::error::MailboxError;
use crate::mail::types::{OutgoingMessage, RawMessage};

/// The IMAP `\Seen` flag.
pub const SEEN: &str = "\\Seen";

/// How a flag is applied by `Mailbox::mark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagAction {
    Add,
    Remove,
    Replace,
}

impl FlagAction {
    /// IMAP `STORE` data item for this action.
    pub fn store_item(&self) -> &'static str {
        match self {
            Self::Add => "+FLAGS",
            Self::Remove => "-FLAGS",
            Self::Replace => "FLAGS",
        }
    }
}

/// A mailbox the engine can poll and reply through.
///
/// Every call may fail with a transport error; the engine treats all of them
/// as non-fatal. Calls have no timeout of their own beyond what the
/// implementation applies.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Address replies are sent from.
    fn address(&self) -> &str;

    /// Ids of unseen messages, oldest first.
    async fn list_unseen(&self) -> Result<Vec<String>, MailboxError>;

    /// Fetch one message, marking it read or explicitly unread.
    async fn fetch(&self, id: &str, mark_read: bool) -> Result<RawMessage, MailboxError>;

    /// Apply `flag` to `ids`; returns the ids affected.
    async fn mark(
        &self,
        ids: &[String],
        flag: &str,
        action: FlagAction,
    ) -> Result<Vec<String>, MailboxError>;

    /// Send a message; returns what was sent.
    async fn send(&self, message: OutgoingMessage) -> Result<OutgoingMessage, MailboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_items() {
        assert_eq!(FlagAction::Add.store_item(), "+FLAGS");
        assert_eq!(FlagAction::Remove.store_item(), "-FLAGS");
        assert_eq!(FlagAction::Replace.store_item(), "FLAGS");
    }
}

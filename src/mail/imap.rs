//! IMAP polling and SMTP sending for a real mailbox.
//!
//! IMAP is spoken directly over rustls; every gateway call opens its own
//! session on a blocking thread. SMTP goes through lettre.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

use crate::error::MailboxError;
use crate::mail::gateway::{FlagAction, Mailbox, SEEN};
use crate::mail::types::{OutgoingAttachment, OutgoingMessage, RawMessage};

static LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d+)\}\r\n$").expect("literal pattern"));
static FETCH_UID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUID (\d+)").expect("uid pattern"));

const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox connection settings, built from environment variables.
#[derive(Debug)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub folder: String,
}

impl MailboxConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let imap_host = lookup("EMAIL_IMAP_HOST")?;

        let imap_port = lookup("EMAIL_IMAP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);
        let smtp_host =
            lookup("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));
        let smtp_port = lookup("EMAIL_SMTP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(465);

        let username = lookup("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(lookup("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = lookup("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());
        let folder = lookup("EMAIL_FOLDER").unwrap_or_else(|| "INBOX".to_string());

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            folder,
        })
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP + SMTP mailbox.
pub struct ImapMailbox {
    config: Arc<MailboxConfig>,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run a blocking IMAP session against the configured folder.
    async fn with_session<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, MailboxError> + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::connect(&config)?;
            session.login(&config.username, config.password.expose_secret())?;
            session.command(&format!("SELECT {}", quote(&config.folder)))?;
            let result = op(&mut session);
            session.logout();
            result
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP worker failed: {e}")))?
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn address(&self) -> &str {
        &self.config.from_address
    }

    async fn list_unseen(&self) -> Result<Vec<String>, MailboxError> {
        self.with_session(|session| {
            let resp = session.command("UID SEARCH UNSEEN")?;
            Ok(parse_search(&resp.lines))
        })
        .await
    }

    async fn fetch(&self, id: &str, mark_read: bool) -> Result<RawMessage, MailboxError> {
        let id = id.to_string();
        self.with_session(move |session| {
            let resp = session.command(&format!("UID FETCH {id} BODY.PEEK[]"))?;
            let bytes = resp
                .literals
                .into_iter()
                .next()
                .ok_or_else(|| MailboxError::Protocol(format!("message {id} not found")))?;

            let action = if mark_read {
                FlagAction::Add
            } else {
                FlagAction::Remove
            };
            session.command(&format!(
                "UID STORE {id} {} ({SEEN})",
                action.store_item()
            ))?;

            Ok(RawMessage { id, bytes })
        })
        .await
    }

    async fn mark(
        &self,
        ids: &[String],
        flag: &str,
        action: FlagAction,
    ) -> Result<Vec<String>, MailboxError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let set = ids.join(",");
        let flag = flag.to_string();
        self.with_session(move |session| {
            let resp = session.command(&format!(
                "UID STORE {set} {} ({flag})",
                action.store_item()
            ))?;
            Ok(parse_fetch_uids(&resp.lines))
        })
        .await
    }

    async fn send(&self, message: OutgoingMessage) -> Result<OutgoingMessage, MailboxError> {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || {
            send_smtp(&config, &message)?;
            Ok(message)
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("SMTP worker failed: {e}")))?
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

fn send_smtp(config: &MailboxConfig, message: &OutgoingMessage) -> Result<(), MailboxError> {
    let send_err = |reason: String| MailboxError::Send {
        to: message.to.clone(),
        reason,
    };

    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );
    let builder = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    }
    .map_err(|e| send_err(format!("SMTP relay error: {e}")))?;
    let transport = builder.port(config.smtp_port).credentials(creds).build();

    let octet_stream = ContentType::parse("application/octet-stream")
        .map_err(|e| send_err(format!("Invalid content type: {e}")))?;
    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(message.body.clone()));
    for attachment in &message.attachments {
        let data = match attachment {
            OutgoingAttachment::Path(path) => read_attachment(path)?,
            OutgoingAttachment::Bytes { data, .. } => data.clone(),
        };
        parts = parts.singlepart(
            Attachment::new(attachment.filename()).body(data, octet_stream.clone()),
        );
    }

    let email = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| send_err(format!("Invalid from address: {e}")))?,
        )
        .to(message
            .to
            .parse()
            .map_err(|e| send_err(format!("Invalid to address: {e}")))?)
        .subject(message.subject.as_str())
        .multipart(parts)
        .map_err(|e| send_err(format!("Failed to build email: {e}")))?;

    transport
        .send(&email)
        .map_err(|e| send_err(format!("SMTP send failed: {e}")))?;

    tracing::info!(to = %message.to, subject = %message.subject, "Reply sent");
    Ok(())
}

fn read_attachment(path: &Path) -> Result<Vec<u8>, MailboxError> {
    std::fs::read(path).map_err(MailboxError::Io)
}

// ── IMAP session ────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Lines and literal payloads of one tagged command.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// A single authenticated IMAP connection (blocking).
struct ImapSession {
    stream: TlsStream,
    next_tag: u32,
    host: String,
}

impl ImapSession {
    fn connect(config: &MailboxConfig) -> Result<Self, MailboxError> {
        let connect_err = |reason: String| MailboxError::Connect {
            host: config.imap_host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| MailboxError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
            host: config.imap_host.clone(),
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with(b"* OK") && !greeting.starts_with(b"* PREAUTH") {
            return Err(connect_err(format!(
                "unexpected greeting: {}",
                String::from_utf8_lossy(&greeting).trim_end()
            )));
        }
        Ok(session)
    }

    fn login(&mut self, user: &str, password: &str) -> Result<(), MailboxError> {
        self.command(&format!("LOGIN {} {}", quote(user), quote(password)))
            .map(|_| ())
            .map_err(|_| MailboxError::Auth {
                user: user.to_string(),
            })
    }

    fn logout(mut self) {
        if let Err(e) = self.command("LOGOUT") {
            tracing::debug!(host = %self.host, error = %e, "IMAP logout failed");
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, MailboxError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte)? {
                0 => return Err(MailboxError::Protocol("IMAP connection closed".into())),
                _ => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(buf);
                    }
                }
            }
        }
    }

    /// Send a tagged command and collect its response; errors unless tagged `OK`.
    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut resp = Response::default();
        loop {
            let raw = self.read_line()?;
            let line = String::from_utf8_lossy(&raw).to_string();

            if let Some(size) = literal_size(&line) {
                let mut literal = vec![0u8; size];
                self.stream.read_exact(&mut literal)?;
                resp.literals.push(literal);
                resp.lines.push(line);
                // remainder of the line that carried the literal, usually ")"
                let rest = self.read_line()?;
                resp.lines.push(String::from_utf8_lossy(&rest).to_string());
                continue;
            }

            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                if status.starts_with("OK") {
                    return Ok(resp);
                }
                let verb = cmd.split_whitespace().next().unwrap_or(cmd);
                return Err(MailboxError::Protocol(format!(
                    "{verb} failed: {}",
                    status.trim_end()
                )));
            }
            resp.lines.push(line);
        }
    }
}

/// Quote an IMAP string argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn literal_size(line: &str) -> Option<usize> {
    LITERAL
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Ids from `* SEARCH` lines.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

/// UIDs echoed in untagged `FETCH` responses.
fn parse_fetch_uids(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| line.starts_with("* ") && line.contains("FETCH"))
        .filter_map(|line| FETCH_UID.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_none_without_imap_host() {
        assert!(MailboxConfig::from_lookup(lookup(&[("EMAIL_USERNAME", "x")])).is_none());
    }

    #[test]
    fn config_defaults() {
        let cfg = MailboxConfig::from_lookup(lookup(&[
            ("EMAIL_IMAP_HOST", "imap.example.com"),
            ("EMAIL_USERNAME", "bot@example.com"),
            ("EMAIL_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        assert_eq!(cfg.imap_port, 993);
        assert_eq!(cfg.smtp_host, "smtp.example.com");
        assert_eq!(cfg.smtp_port, 465);
        assert_eq!(cfg.from_address, "bot@example.com");
        assert_eq!(cfg.folder, "INBOX");
        assert_eq!(cfg.password.expose_secret(), "hunter2");
    }

    #[test]
    fn config_password_not_in_debug() {
        let cfg = MailboxConfig::from_lookup(lookup(&[
            ("EMAIL_IMAP_HOST", "imap.example.com"),
            ("EMAIL_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn search_ids() {
        let lines = vec!["* SEARCH 3 7 12\r\n".to_string()];
        assert_eq!(parse_search(&lines), vec!["3", "7", "12"]);
        assert!(parse_search(&["* SEARCH\r\n".to_string()]).is_empty());
    }

    #[test]
    fn literal_sizes() {
        assert_eq!(literal_size("* 1 FETCH (UID 5 BODY[] {342}\r\n"), Some(342));
        assert_eq!(literal_size("* 1 FETCH (FLAGS (\\Seen))\r\n"), None);
    }

    #[test]
    fn fetch_uids_from_store() {
        let lines = vec![
            "* 1 FETCH (UID 5 FLAGS (\\Seen))\r\n".to_string(),
            "* 2 FETCH (FLAGS (\\Seen) UID 9)\r\n".to_string(),
        ];
        assert_eq!(parse_fetch_uids(&lines), vec!["5", "9"]);
    }

    #[test]
    fn quoting_escapes() {
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }
}

//! Command lexer: splits a message body into plain text, `[args]` and `<settings>`.
//!
//! Grammar:
//! - `[...]` is an argument, `<...>` is a setting (conventionally `key:value`).
//! - A backslash before `[`, `]`, `<` or `>` makes it a literal character.
//!   The backslash is kept in the output segment.
//! - Settings are found anywhere in the body. A `<...>` inside `[...]` is
//!   still a setting and splits the argument around it. Inside `<...>`
//!   square brackets are literal.
//! - Any other unescaped bracket without a partner is a `CommandError::Malformed`.
//! - Text outside brackets is split at every span; trimmed non-empty pieces
//!   become `plain` entries. The leading word characters of the first plain
//!   entry are the command keyword, provided nothing bracketed precedes it.

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

const ESCAPE: char = '\\';

/// Which sequence a token belongs to, in source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TokenKind {
    Plain,
    Arg,
    Setting,
}

/// A parsed command body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    /// Unbracketed text segments.
    pub plain: Vec<String>,
    /// Square-bracket segments.
    pub args: Vec<String>,
    /// Angle-bracket segments.
    pub settings: Vec<String>,
    order: Vec<TokenKind>,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Outside,
    /// `within` holds the start of the enclosing `[...]`, if any.
    Angle { start: usize, within: Option<usize> },
    Square { start: usize },
}

/// Parse a message body into a `ParsedCommand`.
pub fn parse(body: &str) -> Result<ParsedCommand, CommandError> {
    let mut parsed = ParsedCommand::default();
    let mut state = State::Outside;
    let mut buf = String::new();
    let mut chars = body.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        if ch == ESCAPE
            && let Some(&(_, next)) = chars.peek()
            && is_delimiter(next)
        {
            buf.push(ch);
            buf.push(next);
            chars.next();
            continue;
        }

        match (state, ch) {
            (State::Outside, '<') => {
                parsed.push(TokenKind::Plain, &buf);
                buf.clear();
                state = State::Angle {
                    start: pos,
                    within: None,
                };
            }
            (State::Square { start }, '<') => {
                parsed.push(TokenKind::Arg, &buf);
                buf.clear();
                state = State::Angle {
                    start: pos,
                    within: Some(start),
                };
            }
            (State::Outside, '[') => {
                parsed.push(TokenKind::Plain, &buf);
                buf.clear();
                state = State::Square { start: pos };
            }
            (State::Outside, '>' | ']') | (State::Square { .. }, '>') => {
                return Err(CommandError::Malformed {
                    delimiter: ch,
                    position: pos,
                });
            }
            (State::Angle { within, .. }, '>') => {
                parsed.push(TokenKind::Setting, &buf);
                buf.clear();
                state = match within {
                    Some(start) => State::Square { start },
                    None => State::Outside,
                };
            }
            (State::Square { .. }, ']') => {
                parsed.push(TokenKind::Arg, &buf);
                buf.clear();
                state = State::Outside;
            }
            (State::Angle { start, .. }, '<') => {
                return Err(CommandError::Malformed {
                    delimiter: '<',
                    position: start,
                });
            }
            (State::Square { start }, '[') => {
                return Err(CommandError::Malformed {
                    delimiter: '[',
                    position: start,
                });
            }
            _ => buf.push(ch),
        }
    }

    match state {
        State::Outside => {
            parsed.push(TokenKind::Plain, &buf);
            Ok(parsed)
        }
        State::Angle { start, .. } => Err(CommandError::Malformed {
            delimiter: '<',
            position: start,
        }),
        State::Square { start } => Err(CommandError::Malformed {
            delimiter: '[',
            position: start,
        }),
    }
}

fn is_delimiter(ch: char) -> bool {
    matches!(ch, '<' | '>' | '[' | ']')
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

impl ParsedCommand {
    fn push(&mut self, kind: TokenKind, raw: &str) {
        let text = raw.trim();
        if text.is_empty() {
            return;
        }
        let target = match kind {
            TokenKind::Plain => &mut self.plain,
            TokenKind::Arg => &mut self.args,
            TokenKind::Setting => &mut self.settings,
        };
        target.push(text.to_string());
        self.order.push(kind);
    }

    /// The command keyword, lower-cased.
    ///
    /// The run of word characters that opens the first word, so `read:` and
    /// `help!` give `read` and `help`. A word with no leading word character
    /// (such as `?`) is taken whole. Empty when the body is empty or starts
    /// with a bracketed segment.
    pub fn keyword(&self) -> String {
        if self.order.first() != Some(&TokenKind::Plain) {
            return String::new();
        }
        let Some(word) = self.plain.first().and_then(|p| p.split_whitespace().next()) else {
            return String::new();
        };
        let end = word
            .char_indices()
            .find(|&(_, c)| !is_word_char(c))
            .map_or(word.len(), |(i, _)| i);
        let keyword = if end == 0 { word } else { &word[..end] };
        keyword.to_lowercase()
    }

    /// All plain text after the keyword, joined with single spaces.
    pub fn text_after_keyword(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        let mut plain = self.plain.iter();
        if self.order.first() == Some(&TokenKind::Plain)
            && let Some(first) = plain.next()
        {
            let rest = first
                .trim_start()
                .split_once(char::is_whitespace)
                .map(|(_, rest)| rest.trim())
                .unwrap_or("");
            if !rest.is_empty() {
                parts.push(rest);
            }
        }
        parts.extend(plain.map(String::as_str));
        parts.join(" ")
    }

    /// First argument, if any.
    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Settings split into lower-cased keys and trimmed values.
    ///
    /// A setting without `:` yields an empty value.
    pub fn setting_pairs(&self) -> Vec<(String, String)> {
        self.settings
            .iter()
            .map(|s| match s.split_once(':') {
                Some((k, v)) => (k.trim().to_lowercase(), v.trim().to_string()),
                None => (s.trim().to_lowercase(), String::new()),
            })
            .collect()
    }

    /// Value of the last setting with the given key.
    pub fn setting(&self, key: &str) -> Option<String> {
        let key = key.to_lowercase();
        self.setting_pairs()
            .into_iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// A copy with every `<setting>` removed.
    pub fn without_settings(&self) -> Self {
        Self {
            plain: self.plain.clone(),
            args: self.args.clone(),
            settings: Vec::new(),
            order: self
                .order
                .iter()
                .copied()
                .filter(|k| *k != TokenKind::Setting)
                .collect(),
        }
    }

    /// Whether nothing was parsed.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Re-serialise into a body that parses back to an equal command.
    pub fn to_body(&self) -> String {
        let mut plain = self.plain.iter();
        let mut args = self.args.iter();
        let mut settings = self.settings.iter();
        let mut pieces = Vec::with_capacity(self.order.len());

        for kind in &self.order {
            let piece = match kind {
                TokenKind::Plain => plain.next().cloned(),
                TokenKind::Arg => args.next().map(|a| enclose('[', a, ']')),
                TokenKind::Setting => settings.next().map(|s| enclose('<', s, '>')),
            };
            pieces.extend(piece);
        }
        pieces.join(" ")
    }

    /// Re-serialise everything after the keyword (see `to_body`).
    pub fn body_after_keyword(&self) -> String {
        let mut rest = self.clone();
        if self.order.first() == Some(&TokenKind::Plain) {
            let tail = self.plain[0]
                .trim_start()
                .split_once(char::is_whitespace)
                .map(|(_, t)| t.trim().to_string())
                .unwrap_or_default();
            if tail.is_empty() {
                rest.plain.remove(0);
                rest.order.remove(0);
            } else {
                rest.plain[0] = tail;
            }
        }
        rest.to_body()
    }
}

fn enclose(open: char, text: &str, close: char) -> String {
    // A trailing backslash would escape the closing delimiter.
    if text.ends_with(ESCAPE) {
        format!("{open}{text} {close}")
    } else {
        format!("{open}{text}{close}")
    }
}

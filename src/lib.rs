//! Emalia: a mailbox-driven command server.

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod llm;
pub mod mail;
pub mod tasks;

//! Command language for message bodies.

pub mod lexer;

pub use lexer::{ParsedCommand, parse};

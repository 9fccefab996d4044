//! Brie parser: tokenizer and grammar producing the finalized AST.
//!
//! The surface language is line oriented. A file is a list of top-level
//! lines (`define name value` or `require "module"`), blocks are written
//! `: params [ lines ]`, objects `< name = value, ... >`, and application is
//! prefix and curried: `(f a b)` is `((f a) b)`.

pub mod ast;
pub mod error;
mod grammar;
pub mod lexer;

use brie_common::GenericAllocator;

pub use ast::{Binder, Field, Node, NodeKind, Program, SpecialForm, Token, TokenKind};
pub use error::ParseError;

use grammar::Grammar;
use lexer::Lexer;

/// Parse a source file, drawing every node's generic from `alloc`.
///
/// Stops at the first error.
pub fn parse(source: &str, alloc: &mut GenericAllocator) -> Result<Program, ParseError> {
    let tokens = Lexer::tokenize(source)?;
    tracing::trace!(tokens = tokens.len(), "tokenized");
    let mut grammar = Grammar::new(tokens, source.len(), alloc);
    let (items, span) = grammar.program()?;
    tracing::debug!(items = items.len(), generics = alloc.issued(), "parsed program");
    Ok(Program { items, span })
}

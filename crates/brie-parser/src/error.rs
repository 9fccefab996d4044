//! Parse error type for the Brie grammar.

use std::fmt;

use brie_common::Span;

/// A grammar failure: a message, the span where it was detected, and an
/// optional related location (e.g. where an unclosed bracket was opened).
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    pub related: Option<(String, Span)>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            related: None,
        }
    }

    /// Attach a secondary location with its own label.
    pub fn with_related(mut self, message: impl Into<String>, span: Span) -> Self {
        self.related = Some((message.into(), span));
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn related_span_is_kept() {
        let err = ParseError::new("unclosed `[`", Span::new(9, 10))
            .with_related("block opened here", Span::new(0, 1));
        assert_eq!(err.to_string(), "unclosed `[`");
        let (msg, span) = err.related.unwrap();
        assert_eq!(msg, "block opened here");
        assert_eq!(span, Span::new(0, 1));
    }
}

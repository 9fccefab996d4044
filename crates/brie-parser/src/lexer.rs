//! Tokenizer for Brie source text.
//!
//! Produces a flat list of [`RawToken`]s. Words (`foo`, `x1`, `empty?`) and
//! operator runs (`+`, `::`, `->`, `<=`) are both identifiers; an identifier
//! whose text parses as an `i64` is an integer. Newlines are significant
//! because they separate lines, so they are kept as tokens.

use brie_common::Span;

use crate::error::ParseError;

/// Kind of a raw token, before any grammar pass has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Ident,
    Integer,
    Str,
    /// `.name` -- the text holds `name` without the dot.
    Field,
    LSquare,
    RSquare,
    LParen,
    RParen,
    /// `<` opening an object literal.
    LAngle,
    /// `>` closing an object literal.
    RAngle,
    Colon,
    Semicolon,
    Comma,
    /// A lone `=` (object field separator).
    Equals,
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawToken {
    pub kind: RawKind,
    pub text: String,
    pub span: Span,
}

const OPERATOR_CHARS: &str = "+-*/%=!<>&|:^~?@$";

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '\'' | '?' | '!')
}

fn is_operator_char(c: char) -> bool {
    OPERATOR_CHARS.contains(c)
}

pub struct Lexer<'src> {
    source: &'src str,
    pos: usize,
    tokens: Vec<RawToken>,
    /// Paren depth at which each currently open object literal started.
    open_objects: Vec<u32>,
    paren_depth: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            pos: 0,
            tokens: Vec::new(),
            open_objects: Vec::new(),
            paren_depth: 0,
        }
    }

    /// Tokenize the whole source.
    pub fn tokenize(source: &str) -> Result<Vec<RawToken>, ParseError> {
        let mut lexer = Lexer::new(source);
        lexer.run()?;
        Ok(lexer.tokens)
    }

    fn run(&mut self) -> Result<(), ParseError> {
        while let Some(c) = self.peek() {
            let start = self.pos;
            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                '\n' => self.single(RawKind::Newline),
                '[' => self.single(RawKind::LSquare),
                ']' => self.single(RawKind::RSquare),
                '(' => {
                    self.paren_depth += 1;
                    self.single(RawKind::LParen);
                }
                ')' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.single(RawKind::RParen);
                }
                ';' => self.single(RawKind::Semicolon),
                ',' => self.single(RawKind::Comma),
                '"' => self.string(start)?,
                '.' => self.field(start)?,
                '<' if self.object_opens_here() => {
                    self.open_objects.push(self.paren_depth);
                    self.single(RawKind::LAngle);
                }
                '>' if self.object_closes_here() => {
                    self.open_objects.pop();
                    self.single(RawKind::RAngle);
                }
                '-' if self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.bump();
                    self.word(start);
                }
                c if c.is_alphanumeric() || c == '_' => self.word(start),
                c if is_operator_char(c) => self.operator(start),
                other => {
                    return Err(ParseError::new(
                        format!("unexpected character `{other}`"),
                        self.span_from(start + other.len_utf8(), start),
                    ))
                }
            }
        }
        Ok(())
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn span_from(&self, end: usize, start: usize) -> Span {
        Span::new(start as u32, end as u32)
    }

    fn push(&mut self, kind: RawKind, text: &str, start: usize) {
        self.tokens.push(RawToken {
            kind,
            text: text.to_string(),
            span: self.span_from(self.pos, start),
        });
    }

    fn single(&mut self, kind: RawKind) {
        let start = self.pos;
        let c = self.bump().map(String::from).unwrap_or_default();
        self.push(kind, &c, start);
    }

    fn word(&mut self, start: usize) {
        while self.peek().is_some_and(is_word_char) {
            self.bump();
        }
        let text = &self.source[start..self.pos];
        let kind = if text.parse::<i64>().is_ok() {
            RawKind::Integer
        } else {
            RawKind::Ident
        };
        self.push(kind, text, start);
    }

    fn operator(&mut self, start: usize) {
        while self.peek().is_some_and(is_operator_char) {
            self.bump();
        }
        let text = &self.source[start..self.pos];
        let kind = match text {
            ":" => RawKind::Colon,
            "=" => RawKind::Equals,
            _ => RawKind::Ident,
        };
        self.push(kind, text, start);
    }

    fn string(&mut self, start: usize) -> Result<(), ParseError> {
        self.bump();
        let body_start = self.pos;
        loop {
            match self.bump() {
                Some('"') => break,
                Some(_) => {}
                None => {
                    return Err(ParseError::new(
                        "unterminated string literal",
                        self.span_from(self.pos, start),
                    ))
                }
            }
        }
        let body = &self.source[body_start..self.pos - 1];
        self.push(RawKind::Str, body, start);
        Ok(())
    }

    fn field(&mut self, start: usize) -> Result<(), ParseError> {
        self.bump();
        let name_start = self.pos;
        while self.peek().is_some_and(is_word_char) {
            self.bump();
        }
        if name_start == self.pos {
            return Err(ParseError::new(
                "expected a field name after `.`",
                self.span_from(self.pos.max(start + 1), start),
            ));
        }
        let name = &self.source[name_start..self.pos];
        self.push(RawKind::Field, name, start);
        Ok(())
    }

    /// `>` closes the innermost object literal when it sits at the object's
    /// paren depth, is not the start of a longer operator (`>=`), and ends a
    /// field value. Directly after `<`, `=`, `,` or `(` it is the comparison
    /// operator in head position, as in `<big = > 3 2>`. A comparison passed
    /// as a bare argument inside an object field must be parenthesized.
    fn object_closes_here(&self) -> bool {
        if self.open_objects.last() != Some(&self.paren_depth) {
            return false;
        }
        if self.peek_nth(1).is_some_and(is_operator_char) {
            return false;
        }
        !matches!(
            self.tokens.last().map(|t| t.kind),
            Some(RawKind::LAngle | RawKind::Equals | RawKind::Comma | RawKind::LParen)
        )
    }

    /// `<` opens an object literal when it is followed by `name =` (and not `==`).
    fn object_opens_here(&self) -> bool {
        let rest = &self.source[self.pos + 1..];
        let rest = rest.trim_start_matches([' ', '\t', '\r', '\n']);
        let name_len: usize = rest
            .chars()
            .take_while(|c| is_word_char(*c))
            .map(char::len_utf8)
            .sum();
        if name_len == 0 || rest.starts_with(|c: char| c.is_ascii_digit()) {
            return false;
        }
        let after = rest[name_len..].trim_start_matches([' ', '\t']);
        after.starts_with('=') && !after.starts_with("==")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<RawKind> {
        Lexer::tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn words_integers_and_operators() {
        let tokens = Lexer::tokenize("(+ x1 -42 \"hi there\")").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["(", "+", "x1", "-42", "hi there", ")"]);
        assert_eq!(tokens[3].kind, RawKind::Integer);
        assert_eq!(tokens[4].kind, RawKind::Str);
        assert_eq!(tokens[4].span, Span::new(10, 20));
    }

    #[test]
    fn block_punctuation() {
        use RawKind::*;
        assert_eq!(
            kinds(": x [ x ]\n"),
            [Colon, Ident, LSquare, Ident, RSquare, Newline]
        );
        assert_eq!(kinds("::"), [Ident]);
    }

    #[test]
    fn angle_brackets_only_open_objects() {
        use RawKind::*;
        assert_eq!(
            kinds("<x = (< a b), y=2>"),
            [LAngle, Ident, Equals, LParen, Ident, Ident, Ident, RParen, Comma, Ident, Equals, Integer, RAngle]
        );
        assert_eq!(kinds("(<= a b)"), [LParen, Ident, Ident, Ident, RParen]);
        assert_eq!(kinds("(== a b)"), [LParen, Ident, Ident, Ident, RParen]);
    }

    #[test]
    fn greater_than_in_head_position_stays_an_operator() {
        use RawKind::*;
        assert_eq!(
            kinds("< big = > 3 2 >"),
            [LAngle, Ident, Equals, Ident, Integer, Integer, RAngle]
        );
        assert_eq!(
            kinds("<a = 1, b = >= x 2>"),
            [LAngle, Ident, Equals, Integer, Comma, Ident, Equals, Ident, Ident, Integer, RAngle]
        );
        assert_eq!(kinds("<n = x>"), [LAngle, Ident, Equals, Ident, RAngle]);
    }

    #[test]
    fn field_access_and_comments() {
        let tokens = Lexer::tokenize("point.x # trailing comment").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].kind, RawKind::Field);
        assert_eq!(tokens[1].text, "x");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::tokenize("\"oops").unwrap_err();
        assert_eq!(err.message, "unterminated string literal");
    }

    #[test]
    fn stray_character_is_an_error() {
        let err = Lexer::tokenize("a { b").unwrap_err();
        assert_eq!(err.message, "unexpected character `{`");
        assert_eq!(err.span, Span::new(2, 3));
    }
}

//! Grammar: turns the raw token list into the finalized AST.
//!
//! Works in two stages. The first groups tokens by their brackets into a
//! tree of [`Item`]s (parentheses, blocks with parameter lists, object
//! literals) and splits block bodies and the file into lines. The second
//! lowers that tree into [`Node`]s, and while doing so:
//!
//! - attaches `.field` tokens to the preceding expression (left to right),
//! - wraps every line and every object field value in a parenthesized form,
//! - folds `define` lines inside blocks into `LetIn` continuations,
//! - recognizes special-form shapes (`if`, `while`, `match`, `::`, ...),
//! - rewrites applications with more than one argument into nested binary
//!   applications: `(f a b)` becomes `((f a) b)`.

use brie_common::{GenericAllocator, Span};

use crate::ast::{is_tag_name, Binder, Field, Node, NodeKind, SpecialForm, Token, TokenKind, ARROW};
use crate::error::ParseError;
use crate::lexer::{RawKind, RawToken};

// ── Stage one: bracket tree ────────────────────────────────────────────

#[derive(Debug)]
enum Item {
    Tok(RawToken),
    Field(RawToken),
    Paren {
        items: Vec<Item>,
        span: Span,
    },
    Block {
        params: Vec<RawToken>,
        lines: Vec<Vec<Item>>,
        span: Span,
    },
    Object {
        fields: Vec<(RawToken, Vec<Item>)>,
        span: Span,
    },
}

impl Item {
    fn span(&self) -> Span {
        match self {
            Item::Tok(tok) | Item::Field(tok) => tok.span,
            Item::Paren { span, .. } | Item::Block { span, .. } | Item::Object { span, .. } => {
                *span
            }
        }
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self, Item::Tok(tok) if tok.kind == RawKind::Ident && tok.text == name)
    }
}

fn items_span(items: &[Item]) -> Span {
    match (items.first(), items.last()) {
        (Some(first), Some(last)) => first.span().merge(last.span()),
        _ => Span::default(),
    }
}

fn describe(kind: RawKind) -> &'static str {
    match kind {
        RawKind::RSquare => "`]`",
        RawKind::RParen => "`)`",
        RawKind::RAngle => "`>`",
        RawKind::Comma => "`,`",
        RawKind::Equals => "`=`",
        RawKind::Colon => "`:`",
        RawKind::Semicolon => "`;`",
        RawKind::Newline => "end of line",
        RawKind::LSquare => "`[`",
        RawKind::LParen => "`(`",
        RawKind::LAngle => "`<`",
        RawKind::Ident | RawKind::Integer | RawKind::Str | RawKind::Field => "token",
    }
}

pub(crate) struct Grammar<'a> {
    tokens: Vec<RawToken>,
    pos: usize,
    end: u32,
    alloc: &'a mut GenericAllocator,
}

impl<'a> Grammar<'a> {
    pub(crate) fn new(tokens: Vec<RawToken>, source_len: usize, alloc: &'a mut GenericAllocator) -> Self {
        Self {
            tokens,
            pos: 0,
            end: source_len as u32,
            alloc,
        }
    }

    fn peek(&self) -> Option<&RawToken> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<RawToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eof_span(&self) -> Span {
        Span::new(self.end, self.end)
    }

    /// Lines up to `close` (a block body) or to the end of input (the file).
    fn lines(&mut self, open: Option<&RawToken>) -> Result<(Vec<Vec<Item>>, Span), ParseError> {
        let mut lines = Vec::new();
        let mut line = Vec::new();
        loop {
            let Some(tok) = self.peek() else {
                if let Some(open) = open {
                    return Err(ParseError::new("unclosed `[`", self.eof_span())
                        .with_related("block opened here", open.span));
                }
                break;
            };
            match tok.kind {
                RawKind::Newline | RawKind::Semicolon => {
                    self.pos += 1;
                    if !line.is_empty() {
                        lines.push(std::mem::take(&mut line));
                    }
                }
                RawKind::RSquare if open.is_some() => {
                    let close = tok.span;
                    self.pos += 1;
                    if !line.is_empty() {
                        lines.push(line);
                    }
                    return Ok((lines, close));
                }
                _ => line.push(self.item()?),
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
        Ok((lines, self.eof_span()))
    }

    fn item(&mut self) -> Result<Item, ParseError> {
        let Some(tok) = self.next() else {
            return Err(ParseError::new("unexpected end of input", self.eof_span()));
        };
        match tok.kind {
            RawKind::Ident | RawKind::Integer | RawKind::Str => Ok(Item::Tok(tok)),
            RawKind::Field => Ok(Item::Field(tok)),
            RawKind::LParen => self.paren(tok),
            RawKind::LSquare => self.block(tok.span, Vec::new(), tok),
            RawKind::Colon => self.block_with_params(tok),
            RawKind::LAngle => self.object(tok),
            kind => Err(ParseError::new(
                format!("unexpected {}", describe(kind)),
                tok.span,
            )),
        }
    }

    fn paren(&mut self, open: RawToken) -> Result<Item, ParseError> {
        let mut items = Vec::new();
        loop {
            match self.peek().map(|t| t.kind) {
                None => {
                    return Err(ParseError::new("unclosed `(`", self.eof_span())
                        .with_related("parenthesis opened here", open.span))
                }
                Some(RawKind::Newline | RawKind::Semicolon) => self.pos += 1,
                Some(RawKind::RParen) => {
                    let close = self.next().map(|t| t.span).unwrap_or_default();
                    return Ok(Item::Paren {
                        items,
                        span: open.span.merge(close),
                    });
                }
                Some(_) => items.push(self.item()?),
            }
        }
    }

    fn block_with_params(&mut self, colon: RawToken) -> Result<Item, ParseError> {
        let mut params = Vec::new();
        loop {
            let Some(tok) = self.next() else {
                return Err(ParseError::new("expected `[` after block parameters", self.eof_span())
                    .with_related("parameter list starts here", colon.span));
            };
            match tok.kind {
                RawKind::Ident if !is_tag_name(&tok.text) => params.push(tok),
                RawKind::LSquare => return self.block(colon.span, params, tok),
                _ => {
                    return Err(ParseError::new(
                        "expected an identifier when listing arguments to a block",
                        tok.span,
                    ))
                }
            }
        }
    }

    fn block(&mut self, start: Span, params: Vec<RawToken>, open: RawToken) -> Result<Item, ParseError> {
        let (lines, close) = self.lines(Some(&open))?;
        Ok(Item::Block {
            params,
            lines,
            span: start.merge(close),
        })
    }

    fn object(&mut self, open: RawToken) -> Result<Item, ParseError> {
        let mut fields = Vec::new();
        loop {
            self.skip_newlines();
            let name = match self.next() {
                Some(tok) if tok.kind == RawKind::Ident => tok,
                Some(tok) => return Err(ParseError::new("expected a field name", tok.span)),
                None => {
                    return Err(ParseError::new("unclosed `<`", self.eof_span())
                        .with_related("object opened here", open.span))
                }
            };
            self.skip_newlines();
            match self.next() {
                Some(tok) if tok.kind == RawKind::Equals => {}
                other => {
                    let span = other.map(|t| t.span).unwrap_or(self.eof_span());
                    return Err(ParseError::new(
                        format!("object field `{}` is not followed by `=`", name.text),
                        span,
                    )
                    .with_related("field named here", name.span));
                }
            }
            let mut value = Vec::new();
            let closed = loop {
                match self.peek().map(|t| t.kind) {
                    None => {
                        return Err(ParseError::new("unclosed `<`", self.eof_span())
                            .with_related("object opened here", open.span))
                    }
                    Some(RawKind::Newline) => self.pos += 1,
                    Some(RawKind::Comma) => {
                        self.pos += 1;
                        break None;
                    }
                    Some(RawKind::RAngle) => break self.next().map(|t| t.span),
                    Some(_) => value.push(self.item()?),
                }
            };
            if value.is_empty() {
                return Err(ParseError::new(
                    format!("object field `{}` has no value", name.text),
                    name.span,
                ));
            }
            fields.push((name, value));
            if let Some(close) = closed {
                return Ok(Item::Object {
                    fields,
                    span: open.span.merge(close),
                });
            }
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek().is_some_and(|t| t.kind == RawKind::Newline) {
            self.pos += 1;
        }
    }

    // ── Stage two: lowering ────────────────────────────────────────────

    /// Parse the whole token list into top-level lines.
    pub(crate) fn program(&mut self) -> Result<(Vec<Node>, Span), ParseError> {
        let (lines, _) = self.lines(None)?;
        let items = lines
            .into_iter()
            .map(|line| {
                let span = items_span(&line);
                let nodes = self.lower_items(line)?;
                self.line(nodes, span)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, Span::new(0, self.end)))
    }

    fn lower_items(&mut self, items: Vec<Item>) -> Result<Vec<Node>, ParseError> {
        let in_match = items.first().is_some_and(|i| i.is_ident("match"));
        let mut nodes: Vec<Node> = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Item::Field(tok) => {
                    let Some(base) = nodes.pop() else {
                        return Err(ParseError::new(
                            format!("field access `.{}` has nothing to access", tok.text),
                            tok.span,
                        ));
                    };
                    let span = base.span.merge(tok.span);
                    let kind = NodeKind::DotAccess {
                        base: Box::new(base),
                        field: tok.text,
                        field_span: tok.span,
                    };
                    nodes.push(Node::new(kind, span, self.alloc));
                }
                other => {
                    let node = self.lower_item(other, in_match)?;
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }

    fn lower_item(&mut self, item: Item, in_match: bool) -> Result<Node, ParseError> {
        match item {
            Item::Tok(tok) => {
                let kind = match tok.kind {
                    RawKind::Integer => TokenKind::Integer,
                    RawKind::Str => TokenKind::Str,
                    _ => TokenKind::Ident,
                };
                let token = Token {
                    kind,
                    data: tok.text,
                };
                Ok(Node::new(NodeKind::Token(token), tok.span, self.alloc))
            }
            Item::Paren { items, span } => {
                let children = self.lower_items(items)?;
                self.normalize(children, span)
            }
            Item::Block {
                params,
                lines,
                span,
            } => {
                let arguments = params
                    .into_iter()
                    .map(|p| Binder {
                        name: p.text,
                        generic: self.alloc.fresh(p.span),
                    })
                    .collect();
                let mut children = Vec::with_capacity(lines.len());
                for line in lines {
                    let line_span = items_span(&line);
                    let nodes = self.lower_items(line)?;
                    children.push(self.line(nodes, line_span)?);
                }
                children = if in_match {
                    self.fold_arm_lets(children)?
                } else {
                    self.fold_lets(children)?
                };
                Ok(Node::new(
                    NodeKind::Block {
                        arguments,
                        children,
                    },
                    span,
                    self.alloc,
                ))
            }
            Item::Object { fields, span } => {
                let mut lowered = Vec::with_capacity(fields.len());
                for (name, items) in fields {
                    let value_span = items_span(&items);
                    let nodes = self.lower_items(items)?;
                    lowered.push(Field {
                        name: name.text,
                        span: name.span,
                        value: self.line(nodes, value_span)?,
                    });
                }
                Ok(Node::new(NodeKind::ObjectLiteral(lowered), span, self.alloc))
            }
            Item::Field(tok) => Err(ParseError::new("unexpected field access", tok.span)),
        }
    }

    /// Wrap one line's nodes in a parenthesized form; a line that already is
    /// a single parenthesized form is used as-is.
    fn line(&mut self, mut nodes: Vec<Node>, span: Span) -> Result<Node, ParseError> {
        if nodes.len() == 1 && nodes[0].parens().is_some() {
            return Ok(nodes.remove(0));
        }
        self.normalize(nodes, span)
    }

    /// Turn `define` lines into `LetIn` nodes scoping over the rest of the block.
    fn fold_lets(&mut self, lines: Vec<Node>) -> Result<Vec<Node>, ParseError> {
        let mut rest: Vec<Node> = Vec::new();
        for line in lines.into_iter().rev() {
            if line.special_form() != Some(SpecialForm::Define) {
                rest.insert(0, line);
                continue;
            }
            let NodeKind::Parens(mut parts) = line.kind else {
                unreachable!("special forms are parenthesized");
            };
            let (Some(value), Some(name)) = (parts.pop(), parts.pop()) else {
                return Err(ParseError::new("`define` needs a name and a value", line.span));
            };
            let binder_name = name.ident().unwrap_or_default().to_string();
            let span = rest
                .last()
                .map_or(line.span, |last| line.span.merge(last.span));
            let kind = NodeKind::LetIn {
                name: Binder {
                    name: binder_name,
                    generic: name.generic,
                },
                value: Box::new(value),
                children: std::mem::take(&mut rest),
            };
            rest.push(Node::new(kind, span, self.alloc));
        }
        Ok(rest)
    }

    /// `fold_lets` over each arm of a match block. An arm's body is its
    /// expression plus the non-arm lines up to the next arm.
    fn fold_arm_lets(&mut self, lines: Vec<Node>) -> Result<Vec<Node>, ParseError> {
        let mut out = Vec::with_capacity(lines.len());
        let mut lines = lines.into_iter().peekable();
        while let Some(line) = lines.next() {
            if !line.is_arm() {
                out.push(line);
                continue;
            }
            let (span, generic) = (line.span, line.generic);
            let NodeKind::Parens(mut parts) = line.kind else {
                unreachable!("arms are parenthesized");
            };
            let mut body: Vec<Node> = parts.pop().into_iter().collect();
            while let Some(next) = lines.next_if(|next| !next.is_arm()) {
                body.push(next);
            }
            let mut body = self.fold_lets(body)?.into_iter();
            parts.extend(body.next());
            out.push(Node {
                kind: NodeKind::Parens(parts),
                span,
                generic,
            });
            out.extend(body);
        }
        Ok(out)
    }

    /// One expression from several nodes: a single node stands for itself.
    fn fold(&mut self, mut nodes: Vec<Node>) -> Result<Node, ParseError> {
        if nodes.len() == 1 {
            return Ok(nodes.remove(0));
        }
        let span = match (nodes.first(), nodes.last()) {
            (Some(first), Some(last)) => first.span.merge(last.span),
            _ => Span::default(),
        };
        self.normalize(nodes, span)
    }

    fn parens(&mut self, children: Vec<Node>, span: Span) -> Node {
        Node::new(NodeKind::Parens(children), span, self.alloc)
    }

    /// Give a parenthesized form its final shape.
    fn normalize(&mut self, mut children: Vec<Node>, span: Span) -> Result<Node, ParseError> {
        if let Some(arrow) = children.iter().position(|c| c.is_ident(ARROW)) {
            return self.arm(children, arrow, span);
        }
        let head = children.first().and_then(|c| c.ident()).map(str::to_string);
        let Some(head) = head else {
            return Ok(self.curry(children, span));
        };
        match SpecialForm::from_keyword(&head) {
            Some(SpecialForm::Define) => {
                if children.len() < 3 {
                    return Err(ParseError::new("`define` needs a name and a value", span));
                }
                let name = &children[1];
                if name.ident().map_or(true, |n| SpecialForm::from_keyword(n).is_some()) {
                    return Err(ParseError::new("expected a name after `define`", name.span));
                }
                let value = self.fold(children.split_off(2))?;
                children.push(value);
                Ok(self.parens(children, span))
            }
            Some(form @ (SpecialForm::If | SpecialForm::While | SpecialForm::Match)) => {
                self.conditional(form, children, span)
            }
            Some(SpecialForm::TypeCheck) => {
                if children.len() < 3 || !children.last().is_some_and(Node::is_tag) {
                    return Err(ParseError::new(
                        "expected `:: expression TypeName`",
                        span,
                    ));
                }
                let name = children.pop();
                let expr = self.fold(children.split_off(1))?;
                children.push(expr);
                children.extend(name);
                Ok(self.parens(children, span))
            }
            Some(SpecialForm::Update) => {
                if children.len() < 3 {
                    return Err(ParseError::new("expected `_update target.field value`", span));
                }
                let value = self.fold(children.split_off(2))?;
                children.push(value);
                Ok(self.parens(children, span))
            }
            Some(form @ (SpecialForm::Inlay | SpecialForm::Require)) => {
                let is_string = |n: &Node| {
                    matches!(&n.kind, NodeKind::Token(t) if t.kind == TokenKind::Str)
                };
                if children.len() != 2 || !is_string(&children[1]) {
                    return Err(ParseError::new(
                        format!("`{}` takes a single string", form.keyword()),
                        span,
                    ));
                }
                Ok(self.parens(children, span))
            }
            None if is_tag_name(&head) => Ok(self.parens(children, span)),
            None => Ok(self.curry(children, span)),
        }
    }

    /// `if cond [..] (else [..])`, `while cond [..]`, `match value [..]`.
    fn conditional(&mut self, form: SpecialForm, mut children: Vec<Node>, span: Span) -> Result<Node, ParseError> {
        let keyword = form.keyword();
        let Some(block_at) = children
            .iter()
            .position(|c| matches!(c.kind, NodeKind::Block { .. }))
        else {
            return Err(ParseError::new(format!("`{keyword}` without a block"), span));
        };
        if block_at < 2 {
            return Err(ParseError::new(
                format!("`{keyword}` needs an expression before its block"),
                span,
            ));
        }
        let mut tail = children.split_off(block_at);
        let subject = self.fold(children.split_off(1))?;
        children.push(subject);
        let body = tail.remove(0);
        if let NodeKind::Block { arguments, .. } = &body.kind {
            if !arguments.is_empty() {
                return Err(ParseError::new(
                    format!("the block of `{keyword}` takes no parameters"),
                    body.span,
                ));
            }
        }
        children.push(body);
        let has_else = form == SpecialForm::If
            && tail.len() == 2
            && tail[0].is_ident("else")
            && matches!(tail[1].kind, NodeKind::Block { .. });
        if has_else {
            children.extend(tail.pop());
        } else if let Some(extra) = tail.first() {
            return Err(ParseError::new(
                format!("unexpected expression after the block of `{keyword}`"),
                extra.span,
            ));
        }
        Ok(self.parens(children, span))
    }

    /// Normalize a match arm to `(pattern -> expression)`.
    fn arm(&mut self, mut children: Vec<Node>, arrow: usize, span: Span) -> Result<Node, ParseError> {
        if arrow == 0 || arrow + 1 == children.len() {
            return Err(ParseError::new(
                "a match arm needs a pattern and an expression around `->`",
                span,
            ));
        }
        let expr_nodes = children.split_off(arrow + 1);
        let arrow_node = children.pop();
        let pattern = if children.len() == 1 {
            children.remove(0)
        } else {
            let pattern_span = children[0].span.merge(children[children.len() - 1].span);
            self.parens(children, pattern_span)
        };
        let expr = self.fold(expr_nodes)?;
        let mut arm = vec![pattern];
        arm.extend(arrow_node);
        arm.push(expr);
        Ok(self.parens(arm, span))
    }

    /// `(f a b c)` becomes `(((f a) b) c)`; forms with at most two children
    /// are kept.
    fn curry(&mut self, children: Vec<Node>, span: Span) -> Node {
        if children.len() <= 2 {
            return self.parens(children, span);
        }
        let last = children.len() - 1;
        let mut iter = children.into_iter().enumerate();
        let mut acc = match iter.next() {
            Some((_, head)) => head,
            None => return self.parens(Vec::new(), span),
        };
        for (i, arg) in iter {
            let node_span = if i == last {
                span
            } else {
                acc.span.merge(arg.span)
            };
            acc = self.parens(vec![acc, arg], node_span);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn items(src: &str) -> Vec<Vec<Item>> {
        let tokens = Lexer::tokenize(src).unwrap();
        let mut alloc = GenericAllocator::new();
        let mut grammar = Grammar::new(tokens, src.len(), &mut alloc);
        grammar.lines(None).unwrap().0
    }

    #[test]
    fn lines_split_on_newlines_and_semicolons() {
        let lines = items("a b\n\nc; d\n");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 2);
    }

    #[test]
    fn newlines_inside_brackets_do_not_end_the_line() {
        let lines = items("define main [\n  print 1\n  print 2\n]\n");
        assert_eq!(lines.len(), 1);
        match &lines[0][2] {
            Item::Block { lines, params, .. } => {
                assert!(params.is_empty());
                assert_eq!(lines.len(), 2);
            }
            other => panic!("expected a block, got {other:?}"),
        }
    }

    #[test]
    fn block_spans_cover_the_parameter_list() {
        let lines = items("f : x [ x ]");
        assert_eq!(lines[0][1].span(), Span::new(2, 11));
    }
}

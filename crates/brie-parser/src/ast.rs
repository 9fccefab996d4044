//! The finalized Brie AST.
//!
//! Every node owns exactly one [`Generic`], issued when the node was built.
//! Node kinds are the closed set the analysis passes dispatch on:
//! tokens, parenthesized forms, blocks (closure literals), object literals,
//! field accesses, and `let` continuations produced from `define` lines.
//!
//! Nodes deliberately do not implement `Clone`: the only way to duplicate a
//! subtree is [`Node::deep_copy`], which issues fresh generics for every
//! node in the copy so that two copies never share type variables.

use std::fmt;

use brie_common::{Generic, GenericAllocator, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Integer,
    Str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub data: String,
}

/// A name introduced by a block parameter or a `define`.
#[derive(Debug, PartialEq)]
pub struct Binder {
    pub name: String,
    pub generic: Generic,
}

impl Binder {
    pub fn span(&self) -> Span {
        self.generic.span
    }

    fn deep_copy(&self, alloc: &mut GenericAllocator) -> Binder {
        Binder {
            name: self.name.clone(),
            generic: alloc.fresh(self.generic.span),
        }
    }
}

/// One `name = value` entry of an object literal.
#[derive(Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub span: Span,
    pub value: Node,
}

#[derive(Debug, PartialEq)]
pub enum NodeKind {
    Token(Token),
    Parens(Vec<Node>),
    Block {
        arguments: Vec<Binder>,
        children: Vec<Node>,
    },
    ObjectLiteral(Vec<Field>),
    DotAccess {
        base: Box<Node>,
        field: String,
        field_span: Span,
    },
    LetIn {
        name: Binder,
        value: Box<Node>,
        children: Vec<Node>,
    },
}

#[derive(Debug, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub generic: Generic,
}

/// Keywords that turn a parenthesized form into a special form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialForm {
    Define,
    If,
    While,
    Match,
    TypeCheck,
    Update,
    Inlay,
    Require,
}

impl SpecialForm {
    pub fn from_keyword(word: &str) -> Option<SpecialForm> {
        Some(match word {
            "define" => SpecialForm::Define,
            "if" => SpecialForm::If,
            "while" => SpecialForm::While,
            "match" => SpecialForm::Match,
            "::" => SpecialForm::TypeCheck,
            "_update" => SpecialForm::Update,
            "inlay" => SpecialForm::Inlay,
            "require" => SpecialForm::Require,
            _ => return None,
        })
    }

    pub fn keyword(self) -> &'static str {
        match self {
            SpecialForm::Define => "define",
            SpecialForm::If => "if",
            SpecialForm::While => "while",
            SpecialForm::Match => "match",
            SpecialForm::TypeCheck => "::",
            SpecialForm::Update => "_update",
            SpecialForm::Inlay => "inlay",
            SpecialForm::Require => "require",
        }
    }
}

/// Arrow separating a match arm's pattern from its expression.
pub const ARROW: &str = "->";

/// Whether `name` follows the variant-tag convention (leading uppercase).
pub fn is_tag_name(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

impl Node {
    pub fn new(kind: NodeKind, span: Span, alloc: &mut GenericAllocator) -> Node {
        Node {
            kind,
            span,
            generic: alloc.fresh(span),
        }
    }

    /// The identifier text if this node is an identifier token.
    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Token(Token {
                kind: TokenKind::Ident,
                data,
            }) => Some(data),
            _ => None,
        }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.ident() == Some(name)
    }

    /// A bare capitalized identifier: a zero-argument variant tag.
    pub fn is_tag(&self) -> bool {
        self.ident().is_some_and(is_tag_name)
    }

    pub fn parens(&self) -> Option<&[Node]> {
        match &self.kind {
            NodeKind::Parens(children) => Some(children),
            _ => None,
        }
    }

    /// The special form this node introduces, if it is a parenthesized form
    /// headed by one of the keywords.
    pub fn special_form(&self) -> Option<SpecialForm> {
        self.parens()?
            .first()?
            .ident()
            .and_then(SpecialForm::from_keyword)
    }

    /// A normalized match arm: `(pattern -> expression)`.
    pub fn is_arm(&self) -> bool {
        matches!(self.parens(), Some([_, arrow, _]) if arrow.is_ident(ARROW))
    }

    /// Structural clone with a fresh generic for every node and binder.
    pub fn deep_copy(&self, alloc: &mut GenericAllocator) -> Node {
        let kind = match &self.kind {
            NodeKind::Token(token) => NodeKind::Token(token.clone()),
            NodeKind::Parens(children) => NodeKind::Parens(copy_all(children, alloc)),
            NodeKind::Block {
                arguments,
                children,
            } => NodeKind::Block {
                arguments: arguments.iter().map(|b| b.deep_copy(alloc)).collect(),
                children: copy_all(children, alloc),
            },
            NodeKind::ObjectLiteral(fields) => NodeKind::ObjectLiteral(
                fields
                    .iter()
                    .map(|f| Field {
                        name: f.name.clone(),
                        span: f.span,
                        value: f.value.deep_copy(alloc),
                    })
                    .collect(),
            ),
            NodeKind::DotAccess {
                base,
                field,
                field_span,
            } => NodeKind::DotAccess {
                base: Box::new(base.deep_copy(alloc)),
                field: field.clone(),
                field_span: *field_span,
            },
            NodeKind::LetIn {
                name,
                value,
                children,
            } => NodeKind::LetIn {
                name: name.deep_copy(alloc),
                value: Box::new(value.deep_copy(alloc)),
                children: copy_all(children, alloc),
            },
        };
        Node::new(kind, self.span, alloc)
    }
}

fn copy_all(nodes: &[Node], alloc: &mut GenericAllocator) -> Vec<Node> {
    nodes.iter().map(|n| n.deep_copy(alloc)).collect()
}

fn write_list(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{node}")?;
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Token(token) => match token.kind {
                TokenKind::Str => write!(f, "{:?}", token.data),
                _ => write!(f, "{}", token.data),
            },
            NodeKind::Parens(children) => {
                write!(f, "(")?;
                write_list(f, children)?;
                write!(f, ")")
            }
            NodeKind::Block {
                arguments,
                children,
            } => {
                write!(f, "[")?;
                if !arguments.is_empty() {
                    let names: Vec<&str> = arguments.iter().map(|b| b.name.as_str()).collect();
                    write!(f, "{} | ", names.join(" "))?;
                }
                write_list(f, children)?;
                write!(f, "]")
            }
            NodeKind::ObjectLiteral(fields) => {
                write!(f, "<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", field.name, field.value)?;
                }
                write!(f, ">")
            }
            NodeKind::DotAccess { base, field, .. } => write!(f, "{base}.{field}"),
            NodeKind::LetIn {
                name,
                value,
                children,
            } => {
                write!(f, "(let {} {} in ", name.name, value)?;
                write_list(f, children)?;
                write!(f, ")")
            }
        }
    }
}

/// A parsed source file: its top-level lines, each a parenthesized form.
#[derive(Debug, PartialEq)]
pub struct Program {
    pub items: Vec<Node>,
    pub span: Span,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str, alloc: &mut GenericAllocator) -> Node {
        Node::new(
            NodeKind::Token(Token {
                kind: TokenKind::Ident,
                data: name.to_string(),
            }),
            Span::default(),
            alloc,
        )
    }

    #[test]
    fn special_forms_round_trip_their_keyword() {
        for form in [
            SpecialForm::Define,
            SpecialForm::If,
            SpecialForm::While,
            SpecialForm::Match,
            SpecialForm::TypeCheck,
            SpecialForm::Update,
            SpecialForm::Inlay,
            SpecialForm::Require,
        ] {
            assert_eq!(SpecialForm::from_keyword(form.keyword()), Some(form));
        }
        assert_eq!(SpecialForm::from_keyword("lambda"), None);
    }

    #[test]
    fn deep_copy_restamps_every_generic() {
        let mut alloc = GenericAllocator::new();
        let f = ident("f", &mut alloc);
        let x = ident("x", &mut alloc);
        let call = Node::new(NodeKind::Parens(vec![f, x]), Span::new(0, 5), &mut alloc);
        let copy = call.deep_copy(&mut alloc);

        assert_eq!(copy.to_string(), call.to_string());
        assert_eq!(copy.span, call.span);
        assert_ne!(copy.generic.id, call.generic.id);
        let (orig, copied) = (call.parens().unwrap(), copy.parens().unwrap());
        for (a, b) in orig.iter().zip(copied) {
            assert_ne!(a.generic.id, b.generic.id);
        }
        assert_eq!(alloc.issued(), 6);
    }

    #[test]
    fn tags_are_capitalized_identifiers() {
        let mut alloc = GenericAllocator::new();
        assert!(ident("Some", &mut alloc).is_tag());
        assert!(!ident("some", &mut alloc).is_tag());
        assert!(!ident("+", &mut alloc).is_tag());
    }
}

//! The traversal protocol shared by every backend.
//!
//! [`triage`] owns the one dispatch table and evaluation order over the
//! AST; a [`Backend`] only supplies what happens at each kind of node. The
//! type checker and the JavaScript generator both implement `Backend`, so
//! they necessarily visit programs the same way.
//!
//! Order guarantees:
//! - arguments of calls and variant constructors are visited right to left,
//!   before the head;
//! - `if`/`while` conditions before their blocks, a matched value before its
//!   arms;
//! - blocks are never entered: closure bodies are only visited when called;
//! - a `match` arm whose tag the matched value can never have is skipped;
//! - the blocks of `if`, `while` and `match` are visited inline, line by
//!   line, and the block node itself is never handed to the backend.

use brie_common::Span;
use brie_parser::{Binder, Field, Node, NodeKind, SpecialForm, Token, TokenKind};

use crate::error::TypeError;

pub type TriageResult = Result<(), TypeError>;

/// One arm of a `match`: its pattern, and the lines that run when it is
/// taken (the arm's own expression followed by any plain lines up to the
/// next arm).
#[derive(Debug)]
pub struct Arm<'n> {
    pub pattern: &'n Node,
    pub tag: &'n str,
    pub binders: Vec<&'n Node>,
    pub body: Vec<&'n Node>,
}

impl Arm<'_> {
    pub fn binder_names(&self) -> impl Iterator<Item = &str> {
        self.binders.iter().filter_map(|binder| binder.ident())
    }
}

/// Node handlers. Every handler runs after the node's sub-expressions
/// (in the order documented on [`triage`]) have been handled.
pub trait Backend {
    /// Called first for every node that is triaged. Implementations must
    /// panic when a node is seen a second time.
    fn before(&mut self, node: &Node);

    fn handle_token(&mut self, node: &Node, token: &Token) -> TriageResult;
    fn handle_true(&mut self, node: &Node) -> TriageResult;
    fn handle_false(&mut self, node: &Node) -> TriageResult;
    /// The unit value `()`.
    fn handle_unit(&mut self, node: &Node) -> TriageResult;

    fn handle_define(&mut self, node: &Node, name: &Node, value: &Node) -> TriageResult;

    /// Called once the value of a `let` has been handled, before its
    /// continuation. Opens the scope closed by [`Backend::exit_scope`].
    fn enter_let(&mut self, node: &Node, name: &Binder, value: &Node) -> TriageResult;
    fn exit_scope(&mut self);
    fn handle_let(&mut self, node: &Node, value: &Node, children: &[Node]) -> TriageResult;

    /// `(function argument)`, or `(function)` when `argument` is `None`.
    fn handle_function_call(&mut self, node: &Node, function: &Node, argument: Option<&Node>) -> TriageResult;
    fn handle_block(&mut self, node: &Node) -> TriageResult;
    fn handle_object_literal(&mut self, node: &Node, fields: &[Field]) -> TriageResult;
    fn handle_dot_access(&mut self, node: &Node, base: &Node, field: &str, field_span: Span) -> TriageResult;

    fn handle_if(&mut self, node: &Node, condition: &Node, then: &[Node], otherwise: Option<&[Node]>) -> TriageResult;
    fn handle_while(&mut self, node: &Node, condition: &Node, body: &[Node]) -> TriageResult;
    fn handle_update(&mut self, node: &Node, target: &Node, value: &Node) -> TriageResult;
    fn handle_type_check(&mut self, node: &Node, expr: &Node, type_name: &Node) -> TriageResult;

    /// Called before an arm's lines are handled. Returns `false` when the
    /// matched value can never take the arm; its lines are then skipped.
    /// Otherwise opens the scope holding the arm's binders, closed by
    /// [`Backend::exit_scope`].
    fn enter_arm(&mut self, value: &Node, arm: &Arm<'_>) -> Result<bool, TypeError>;
    /// `arms` holds only the arms that were taken.
    fn handle_match(&mut self, node: &Node, value: &Node, arms: &[Arm<'_>]) -> TriageResult;

    fn handle_variant(&mut self, node: &Node, tag: &str, arguments: &[Node]) -> TriageResult;
    fn handle_inlay(&mut self, node: &Node, text: &str) -> TriageResult;
    fn handle_require(&mut self, node: &Node, module: &str) -> TriageResult;
}

/// Visit `node` with `backend`.
pub fn triage<B: Backend + ?Sized>(backend: &mut B, node: &Node) -> TriageResult {
    backend.before(node);
    match &node.kind {
        NodeKind::Token(token) => match (token.kind, token.data.as_str()) {
            (TokenKind::Ident, "true") => backend.handle_true(node),
            (TokenKind::Ident, "false") => backend.handle_false(node),
            _ if node.is_tag() => backend.handle_variant(node, &token.data, &[]),
            _ => backend.handle_token(node, token),
        },
        NodeKind::Parens(children) => parens(backend, node, children),
        NodeKind::Block { .. } => backend.handle_block(node),
        NodeKind::ObjectLiteral(fields) => {
            for field in fields {
                triage(backend, &field.value)?;
            }
            backend.handle_object_literal(node, fields)
        }
        NodeKind::DotAccess {
            base,
            field,
            field_span,
        } => {
            triage(backend, base)?;
            backend.handle_dot_access(node, base, field, *field_span)
        }
        NodeKind::LetIn {
            name,
            value,
            children,
        } => {
            triage(backend, value)?;
            backend.enter_let(node, name, value)?;
            let result = lines(backend, children);
            backend.exit_scope();
            result?;
            backend.handle_let(node, value, children)
        }
    }
}

/// Visit a sequence of lines in order.
pub fn lines<B: Backend + ?Sized>(backend: &mut B, nodes: &[Node]) -> TriageResult {
    nodes.iter().try_for_each(|node| triage(backend, node))
}

fn block_lines(node: &Node) -> Option<&[Node]> {
    match &node.kind {
        NodeKind::Block { children, .. } => Some(children),
        _ => None,
    }
}

fn string_argument(node: &Node) -> Option<&str> {
    match &node.kind {
        NodeKind::Token(Token {
            kind: TokenKind::Str,
            data,
        }) => Some(data),
        _ => None,
    }
}

fn parens<B: Backend + ?Sized>(backend: &mut B, node: &Node, children: &[Node]) -> TriageResult {
    let malformed = |form: SpecialForm| {
        TypeError::malformed(format!("malformed `{}` form", form.keyword()), node.span)
    };
    if let Some(form) = node.special_form() {
        return match (form, children) {
            (SpecialForm::Define, [_, name, value]) => {
                triage(backend, value)?;
                backend.handle_define(node, name, value)
            }
            (SpecialForm::If, [_, condition, then, rest @ ..]) if rest.len() <= 1 => {
                let then = block_lines(then).ok_or_else(|| malformed(form))?;
                let otherwise = match rest {
                    [block] => Some(block_lines(block).ok_or_else(|| malformed(form))?),
                    _ => None,
                };
                triage(backend, condition)?;
                lines(backend, then)?;
                if let Some(otherwise) = otherwise {
                    lines(backend, otherwise)?;
                }
                backend.handle_if(node, condition, then, otherwise)
            }
            (SpecialForm::While, [_, condition, body]) => {
                let body = block_lines(body).ok_or_else(|| malformed(form))?;
                triage(backend, condition)?;
                lines(backend, body)?;
                backend.handle_while(node, condition, body)
            }
            (SpecialForm::Match, [_, value, block]) => {
                let arms = match_arms(block)?;
                triage(backend, value)?;
                let mut taken = Vec::with_capacity(arms.len());
                for arm in arms {
                    if !backend.enter_arm(value, &arm)? {
                        continue;
                    }
                    let result = arm.body.iter().try_for_each(|line| triage(backend, line));
                    backend.exit_scope();
                    result?;
                    taken.push(arm);
                }
                backend.handle_match(node, value, &taken)
            }
            (SpecialForm::TypeCheck, [_, expr, type_name]) => {
                triage(backend, expr)?;
                backend.handle_type_check(node, expr, type_name)
            }
            (SpecialForm::Update, [_, target, value]) => {
                triage(backend, value)?;
                triage(backend, target)?;
                backend.handle_update(node, target, value)
            }
            (SpecialForm::Inlay, [_, text]) => match string_argument(text) {
                Some(text) => backend.handle_inlay(node, text),
                None => Err(malformed(form)),
            },
            (SpecialForm::Require, [_, module]) => match string_argument(module) {
                Some(module) => backend.handle_require(node, module),
                None => Err(malformed(form)),
            },
            _ => Err(malformed(form)),
        };
    }
    if node.is_arm() {
        return Err(TypeError::malformed(
            "match arm outside of `match`",
            node.span,
        ));
    }
    match children {
        [] => backend.handle_unit(node),
        [head, arguments @ ..] if head.is_tag() => {
            for argument in arguments.iter().rev() {
                triage(backend, argument)?;
            }
            let tag = head.ident().unwrap_or_default();
            backend.handle_variant(node, tag, arguments)
        }
        [function] => {
            triage(backend, function)?;
            backend.handle_function_call(node, function, None)
        }
        [function, argument] => {
            triage(backend, argument)?;
            triage(backend, function)?;
            backend.handle_function_call(node, function, Some(argument))
        }
        _ => Err(TypeError::malformed(
            "a call must have been reduced to one function and one argument",
            node.span,
        )),
    }
}

/// Split the block of a `match` into arms.
pub fn match_arms(block: &Node) -> Result<Vec<Arm<'_>>, TypeError> {
    let Some(lines) = block_lines(block) else {
        return Err(TypeError::malformed("`match` needs a block of arms", block.span));
    };
    let mut arms: Vec<Arm<'_>> = Vec::new();
    for line in lines {
        let Some([pattern, _, expr]) = line.parens().filter(|_| line.is_arm()) else {
            match arms.last_mut() {
                Some(arm) => arm.body.push(line),
                None => {
                    return Err(TypeError::malformed(
                        "the first line of a `match` block must be an arm `Pattern -> expression`",
                        line.span,
                    ))
                }
            }
            continue;
        };
        let (tag, binders) = match (pattern.ident(), pattern.parens()) {
            (Some(tag), _) if pattern.is_tag() => (tag, Vec::new()),
            (None, Some([head, binders @ ..])) if head.is_tag() => {
                if let Some(bad) = binders.iter().find(|binder| binder.ident().is_none()) {
                    return Err(TypeError::malformed(
                        "pattern arguments must be names",
                        bad.span,
                    ));
                }
                (head.ident().unwrap_or_default(), binders.iter().collect())
            }
            _ => {
                return Err(TypeError::malformed(
                    "a match pattern must be a variant tag",
                    pattern.span,
                ))
            }
        };
        arms.push(Arm {
            pattern,
            tag,
            binders,
            body: vec![expr],
        });
    }
    if arms.is_empty() {
        return Err(TypeError::malformed(
            "`match` needs at least one arm",
            block.span,
        ));
    }
    Ok(arms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brie_common::GenericAllocator;
    use brie_parser::Program;

    fn parse(source: &str) -> Program {
        brie_parser::parse(source, &mut GenericAllocator::new()).unwrap()
    }

    fn match_block(program: &Program) -> &Node {
        let define = program.items[0].parens().unwrap();
        let NodeKind::Block { children, .. } = &define[2].kind else {
            panic!("expected a block");
        };
        &children[0].parens().unwrap()[2]
    }

    #[test]
    fn arms_collect_their_trailing_lines() {
        let program = parse("define f : v [ match v [ (Some x) -> print x; print 2; None -> 0 ] ]");
        let arms = match_arms(match_block(&program)).unwrap();
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[0].tag, "Some");
        assert_eq!(arms[0].binder_names().collect::<Vec<_>>(), ["x"]);
        assert_eq!(arms[0].body.len(), 2);
        assert_eq!(arms[1].tag, "None");
        assert!(arms[1].binders.is_empty());
    }

    #[test]
    fn first_match_line_must_be_an_arm() {
        let program = parse("define f : v [ match v [ print 1; None -> 0 ] ]");
        let err = match_arms(match_block(&program)).unwrap_err();
        assert!(err.to_string().contains("must be an arm"), "{err}");
    }

    #[test]
    fn match_patterns_must_be_tags() {
        let program = parse("define f : v [ match v [ x -> 0 ] ]");
        let err = match_arms(match_block(&program)).unwrap_err();
        assert_eq!(err.to_string(), "a match pattern must be a variant tag");
    }

    #[test]
    fn empty_match_block_is_malformed() {
        let program = parse("define f : v [ match v [ ] ]");
        let err = match_arms(match_block(&program)).unwrap_err();
        assert_eq!(err.to_string(), "`match` needs at least one arm");
    }
}

//! Constraint generators.
//!
//! A fixed sequence of tree passes feeding structural facts into the
//! [`Typetable`]. Each pass assumes the scope binder and every earlier pass
//! have already run over the same subtree. None of them evaluate anything:
//! they only call `constrain` and `alias`.

use std::collections::BTreeMap;

use brie_common::GenericAllocator;
use brie_parser::{Node, NodeKind, SpecialForm, TokenKind};

use crate::error::TypeError;
use crate::store::{LiteralKind, Type, Typetable};

type PassResult = Result<(), TypeError>;

/// Direct subnodes of `node`, in source order.
fn children(node: &Node) -> Vec<&Node> {
    match &node.kind {
        NodeKind::Token(_) => Vec::new(),
        NodeKind::Parens(children) | NodeKind::Block { children, .. } => children.iter().collect(),
        NodeKind::ObjectLiteral(fields) => fields.iter().map(|field| &field.value).collect(),
        NodeKind::DotAccess { base, .. } => vec![base],
        NodeKind::LetIn {
            value, children, ..
        } => std::iter::once(&**value).chain(children).collect(),
    }
}

/// Pre-order walk calling `visit` on every node of the subtree.
fn walk(node: &Node, visit: &mut dyn FnMut(&Node) -> PassResult) -> PassResult {
    visit(node)?;
    children(node).into_iter().try_for_each(|child| walk(child, visit))
}

/// Heads of tagged forms and the type name of `::` look like bare tags but
/// are not values. Arm patterns never reach this check.
fn is_tag_position(parent: &Node, index: usize) -> bool {
    match parent.parens() {
        Some(children) if index == 0 => children[0].is_tag(),
        Some(_) => parent.special_form() == Some(SpecialForm::TypeCheck) && index == 2,
        None => false,
    }
}

pub struct Constraints<'a> {
    store: &'a mut Typetable,
    alloc: &'a mut GenericAllocator,
}

/// Run every pass over `node`, in order.
pub fn run_all(store: &mut Typetable, alloc: &mut GenericAllocator, node: &Node) -> PassResult {
    let mut passes = Constraints { store, alloc };
    passes.literals(node)?;
    passes.applications(node)?;
    passes.closures(node, false)?;
    passes.objects(node)?;
    passes.field_access(node)?;
    passes.variants(node)?;
    tracing::debug!(root = %node.generic, "constraint passes done");
    Ok(())
}

impl<'a> Constraints<'a> {
    /// Integer, string and boolean tokens, and the unit value `()`.
    pub fn literals(&mut self, node: &Node) -> PassResult {
        let store = &mut *self.store;
        walk(node, &mut |node| {
            let kind = match &node.kind {
                NodeKind::Token(token) => match token.kind {
                    TokenKind::Integer => LiteralKind::Integer,
                    TokenKind::Str => LiteralKind::String,
                    TokenKind::Ident if matches!(token.data.as_str(), "true" | "false") => {
                        LiteralKind::Boolean
                    }
                    TokenKind::Ident => return Ok(()),
                },
                NodeKind::Parens(children) if children.is_empty() => LiteralKind::Unit,
                _ => return Ok(()),
            };
            store.constrain(node.generic, Type::Literal(kind))
        })
    }

    /// `(f x)` expects `f` to be a function from `x` to the form; `(e)` is
    /// `e`; a `let` continuation is its last line.
    pub fn applications(&mut self, node: &Node) -> PassResult {
        let store = &mut *self.store;
        walk(node, &mut |node| match &node.kind {
            NodeKind::Parens(children) => {
                if node.special_form().is_some() || node.is_arm() {
                    return Ok(());
                }
                match children.as_slice() {
                    [child] if !child.is_tag() => store.alias(child.generic, node.generic),
                    [function, argument] if !function.is_tag() => store.constrain(
                        function.generic,
                        Type::OpenFunction {
                            param: argument.generic,
                            result: node.generic,
                        },
                    ),
                    _ => Ok(()),
                }
            }
            NodeKind::LetIn { children, .. } => match children.last() {
                Some(last) => store.alias(last.generic, node.generic),
                None => store.constrain(node.generic, Type::Literal(LiteralKind::Unit)),
            },
            _ => Ok(()),
        })
    }

    /// Closure literals build their function type right to left from the
    /// parameters and the last line. Blocks that are the bodies of `if`,
    /// `while` or `match` run inline and are not closures.
    pub fn closures(&mut self, node: &Node, inline: bool) -> PassResult {
        if let NodeKind::Block {
            arguments,
            children,
        } = &node.kind
        {
            if !inline {
                let span = node.span;
                let mut result = match children.last() {
                    Some(last) => last.generic,
                    None => {
                        let unit = self.store.fresh(self.alloc, span);
                        self.store.constrain(unit, Type::Literal(LiteralKind::Unit))?;
                        unit
                    }
                };
                let mut params: Vec<_> = arguments.iter().map(|binder| binder.generic).collect();
                if params.is_empty() {
                    let unit = self.store.fresh(self.alloc, span);
                    self.store.constrain(unit, Type::Literal(LiteralKind::Unit))?;
                    params.push(unit);
                }
                for &param in params[1..].iter().rev() {
                    let function = self.store.fresh(self.alloc, span);
                    self.store
                        .constrain(function, Type::FunctionLiteral { param, result })?;
                    result = function;
                }
                self.store.constrain(
                    node.generic,
                    Type::FunctionLiteral {
                        param: params[0],
                        result,
                    },
                )?;
            }
        }
        let conditional = matches!(
            node.special_form(),
            Some(SpecialForm::If | SpecialForm::While | SpecialForm::Match)
        );
        for child in children(node) {
            let inline = conditional && matches!(child.kind, NodeKind::Block { .. });
            self.closures(child, inline)?;
        }
        Ok(())
    }

    /// Object literals have exactly their fields.
    pub fn objects(&mut self, node: &Node) -> PassResult {
        let store = &mut *self.store;
        walk(node, &mut |node| {
            let NodeKind::ObjectLiteral(fields) = &node.kind else {
                return Ok(());
            };
            let fields: BTreeMap<String, _> = fields
                .iter()
                .map(|field| (field.name.clone(), field.value.generic))
                .collect();
            store.constrain(node.generic, Type::ClosedObject { fields })
        })
    }

    /// `e.name` only requires `e` to have a field `name`.
    pub fn field_access(&mut self, node: &Node) -> PassResult {
        let store = &mut *self.store;
        walk(node, &mut |node| {
            let NodeKind::DotAccess { base, field, .. } = &node.kind else {
                return Ok(());
            };
            store.constrain(
                base.generic,
                Type::OpenObject {
                    fields: BTreeMap::from([(field.clone(), node.generic)]),
                },
            )
        })
    }

    /// `(Tag a b)` and bare `Tag` are single-case variants. Match patterns,
    /// bare or applied, are not values and stay unconstrained; arms take
    /// their binder types from the matched value.
    pub fn variants(&mut self, node: &Node) -> PassResult {
        if node.is_arm() {
            return children(node)
                .into_iter()
                .skip(1)
                .try_for_each(|child| self.variants(child));
        }
        if let Some(children) = node.parens() {
            if let [head, arguments @ ..] = children {
                if let Some(tag) = head.ident().filter(|_| head.is_tag()) {
                    let arguments = arguments.iter().map(|arg| arg.generic).collect();
                    self.store
                        .constrain(node.generic, Type::variant(tag, arguments, node.span))?;
                }
            }
        }
        for (index, child) in children(node).into_iter().enumerate() {
            if child.is_tag() && !is_tag_position(node, index) {
                let tag = child.ident().unwrap_or_default();
                self.store
                    .constrain(child.generic, Type::variant(tag, Vec::new(), child.span))?;
            }
            self.variants(child)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliaser;
    use brie_parser::Program;

    fn analyze(source: &str) -> (Program, Typetable) {
        let mut alloc = GenericAllocator::new();
        let program = brie_parser::parse(source, &mut alloc).unwrap();
        let mut store = Typetable::new();
        aliaser::bind_program(&mut store, &program).unwrap();
        for item in &program.items {
            run_all(&mut store, &mut alloc, item).unwrap();
        }
        (program, store)
    }

    fn define_value(program: &Program, index: usize) -> &Node {
        &program.items[index].parens().unwrap()[2]
    }

    #[test]
    fn literals_are_constrained() {
        let (program, mut store) = analyze("define n 1\ndefine s \"a\"\ndefine b true");
        for (index, expected) in ["Int", "Str", "Bool"].into_iter().enumerate() {
            let value = define_value(&program, index);
            assert_eq!(store.resolve_display(value.generic.id), expected);
        }
    }

    #[test]
    fn closures_are_function_literals() {
        let (program, mut store) = analyze("define f : x y [ x ]");
        let block = define_value(&program, 0);
        assert_eq!(store.resolve_display(block.generic.id), "a function literal");
    }

    #[test]
    fn applying_a_parameter_to_two_argument_types_conflicts() {
        let mut alloc = GenericAllocator::new();
        let program = brie_parser::parse("define f : g [ g 1; g \"a\" ]", &mut alloc).unwrap();
        let mut store = Typetable::new();
        aliaser::bind_program(&mut store, &program).unwrap();
        let err = run_all(&mut store, &mut alloc, &program.items[0]).unwrap_err();
        assert!(matches!(err, TypeError::Conflict { .. }), "{err}");
    }

    #[test]
    fn field_access_requires_an_open_object() {
        let (program, mut store) = analyze("define f : p [ p.x ]");
        let NodeKind::Block { arguments, .. } = &define_value(&program, 0).kind else {
            panic!("expected a block");
        };
        assert_eq!(
            store.resolve_display(arguments[0].generic.id),
            "an object with field(s) x"
        );
    }

    #[test]
    fn tagged_forms_are_variants() {
        let (program, mut store) = analyze("define v (Some 1)\ndefine n None");
        assert_eq!(
            store.resolve_display(define_value(&program, 0).generic.id),
            "variant (Some)"
        );
        assert_eq!(
            store.resolve_display(define_value(&program, 1).generic.id),
            "variant (None)"
        );
    }

    #[test]
    fn match_patterns_stay_unconstrained() {
        let (program, mut store) = analyze("define f : o [\n  match o [\n    (Some x) -> x\n    None -> 0\n  ]\n]");
        let NodeKind::Block { children, .. } = &define_value(&program, 0).kind else {
            panic!("expected a block");
        };
        let Some([_, _, arms]) = children[0].parens() else {
            panic!("expected a match");
        };
        let NodeKind::Block { children: arms, .. } = &arms.kind else {
            panic!("expected a block of arms");
        };
        for arm in arms {
            let pattern = &arm.parens().unwrap()[0];
            assert!(store.class_of(pattern.generic.id).is_none(), "{pattern} was constrained");
        }
        let zero = &arms[1].parens().unwrap()[2];
        assert_eq!(store.resolve_display(zero.generic.id), "Int");
    }
}

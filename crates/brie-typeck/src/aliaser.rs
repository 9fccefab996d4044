//! Scope binder ("aliaser").
//!
//! One depth-first walk that mirrors lexical scoping with a stack of
//! `name -> generic` frames and aliases every identifier occurrence to the
//! generic of its binding site. Block parameters, `let` names and match-arm
//! binders open frames; top-level definitions do not, since top-level
//! functions are specialized per call rather than unified across uses.
//!
//! Every constraint pass assumes this has already run.

use rustc_hash::FxHashMap;

use brie_common::Generic;
use brie_parser::{Node, NodeKind, Program, SpecialForm};

use crate::error::TypeError;
use crate::store::Typetable;

type Frame = FxHashMap<String, Generic>;

pub struct Aliaser<'s> {
    store: &'s mut Typetable,
    frames: Vec<Frame>,
}

/// Bind every top-level line of a file.
pub fn bind_program(store: &mut Typetable, program: &Program) -> Result<(), TypeError> {
    let mut aliaser = Aliaser::new(store);
    for item in &program.items {
        aliaser.visit(item)?;
    }
    Ok(())
}

/// Bind a single subtree, with no enclosing frames.
pub fn bind(store: &mut Typetable, node: &Node) -> Result<(), TypeError> {
    Aliaser::new(store).visit(node)
}

impl<'s> Aliaser<'s> {
    pub fn new(store: &'s mut Typetable) -> Self {
        Aliaser {
            store,
            frames: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> Option<Generic> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).copied())
    }

    fn scoped(&mut self, frame: Frame, nodes: &[Node]) -> Result<(), TypeError> {
        self.frames.push(frame);
        let result = nodes.iter().try_for_each(|node| self.visit(node));
        self.frames.pop();
        result
    }

    pub fn visit(&mut self, node: &Node) -> Result<(), TypeError> {
        match &node.kind {
            NodeKind::Token(_) => {
                let Some(binding) = node.ident().and_then(|name| self.lookup(name)) else {
                    return Ok(());
                };
                if self.store.class_of(node.generic.id).is_none() {
                    self.store.alias(node.generic, binding)?;
                }
                Ok(())
            }
            NodeKind::Parens(children) => match (node.special_form(), children.as_slice()) {
                (Some(SpecialForm::Define), [_, _, value]) => self.visit(value),
                (Some(SpecialForm::TypeCheck), [_, expr, _]) => self.visit(expr),
                (Some(SpecialForm::Inlay | SpecialForm::Require), _) => Ok(()),
                (Some(SpecialForm::Match), [_, value, block]) => {
                    self.visit(value)?;
                    match &block.kind {
                        NodeKind::Block { children, .. } => self.arms(children),
                        _ => self.visit(block),
                    }
                }
                _ => children.iter().try_for_each(|child| self.visit(child)),
            },
            NodeKind::Block {
                arguments,
                children,
            } => {
                let frame = arguments
                    .iter()
                    .map(|binder| (binder.name.clone(), binder.generic))
                    .collect();
                self.scoped(frame, children)
            }
            NodeKind::ObjectLiteral(fields) => {
                fields.iter().try_for_each(|field| self.visit(&field.value))
            }
            NodeKind::DotAccess { base, .. } => self.visit(base),
            NodeKind::LetIn {
                name,
                value,
                children,
            } => {
                self.visit(value)?;
                self.store.alias(name.generic, value.generic)?;
                let frame = Frame::from_iter([(name.name.clone(), name.generic)]);
                self.scoped(frame, children)
            }
        }
    }

    /// Match arms: each arm's binders scope over its expression and the
    /// lines that follow it up to the next arm.
    fn arms(&mut self, lines: &[Node]) -> Result<(), TypeError> {
        let mut open = false;
        let result = lines.iter().try_for_each(|line| {
            let Some([pattern, _, expr]) = line.parens().filter(|_| line.is_arm()) else {
                return self.visit(line);
            };
            if open {
                self.frames.pop();
            }
            let binders = pattern
                .parens()
                .map(|parts| {
                    parts[1..]
                        .iter()
                        .filter_map(|part| Some((part.ident()?.to_string(), part.generic)))
                        .collect()
                })
                .unwrap_or_default();
            self.frames.push(binders);
            open = true;
            self.visit(expr)
        });
        if open {
            self.frames.pop();
        }
        result
    }
}

//! The type backend.
//!
//! Drives the traversal protocol over a file, giving every evaluated node a
//! resolved [`Ty`]. Calls into closures go through the phonebook, which
//! hands back a private deep copy of the closure body per argument-type
//! tuple; that copy is bound, constrained and then evaluated here.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};

use brie_common::{GenericAllocator, GenericId, Span};
use brie_parser::{Binder, Field, Node, NodeKind, Program, SpecialForm, Token, TokenKind};

use crate::builtins::Builtin;
use crate::error::TypeError;
use crate::phonebook::{Expansion, LookupMode, Phonebook, PhonebookHost, Toplevel};
use crate::store::{Type, Typetable};
use crate::triage::{self, Arm, Backend, TriageResult};
use crate::ty::{Callee, Ty};
use crate::{aliaser, constraints, ModuleLoader};

/// A parsed and analyzed source file.
#[derive(Debug)]
pub struct CheckedFile {
    pub name: String,
    pub source: String,
    pub program: Program,
}

pub struct Typer<'l> {
    pub store: Typetable,
    pub phonebook: Phonebook,
    pub types: FxHashMap<GenericId, Ty>,
    pub files: Vec<CheckedFile>,
    seen: FxHashSet<GenericId>,
    loader: &'l mut dyn ModuleLoader,
    entry: String,
    modules: FxHashMap<String, Ty>,
    loading: Vec<String>,
    /// The top-level line currently being indexed.
    toplevel_item: Option<GenericId>,
}

impl<'l> Typer<'l> {
    pub fn new(entry: &str, alloc: GenericAllocator, loader: &'l mut dyn ModuleLoader) -> Self {
        Typer {
            store: Typetable::new(),
            phonebook: Phonebook::new(alloc, entry),
            types: FxHashMap::default(),
            files: Vec::new(),
            seen: FxHashSet::default(),
            loader,
            entry: entry.to_string(),
            modules: FxHashMap::default(),
            loading: Vec::new(),
            toplevel_item: None,
        }
    }

    // ── Files ───────────────────────────────────────────────────────────

    /// Index the entry file and evaluate its `main` block. Returns the
    /// position of `main` among the file's top-level lines.
    pub fn check_entry(&mut self, program: &Program) -> Result<usize, TypeError> {
        self.index_file(program)?;
        let Some((index, value)) = program
            .items
            .iter()
            .enumerate()
            .find_map(|(index, item)| main_value(item).map(|value| (index, value)))
        else {
            return Err(TypeError::MissingMain {
                span: Span::new(program.span.start, program.span.start),
            });
        };
        let NodeKind::Block {
            arguments,
            children,
        } = &value.kind
        else {
            return Err(TypeError::malformed("`main` must be a block", value.span));
        };
        if let Some(param) = arguments.first() {
            return Err(TypeError::malformed("`main` takes no parameters", param.span()));
        }
        tracing::debug!(lines = children.len(), "checking main");
        triage::lines(self, children)?;
        Ok(index)
    }

    /// Bind, constrain and evaluate every top-level line of a file, in
    /// order, entering each definition in the file's top-level table.
    fn index_file(&mut self, program: &Program) -> Result<(), TypeError> {
        if let Some(item) = program
            .items
            .iter()
            .find(|item| !matches!(item.special_form(), Some(SpecialForm::Define | SpecialForm::Require)))
        {
            return Err(TypeError::malformed(
                "only `define` and `require` may appear at the top level",
                item.span,
            ));
        }
        aliaser::bind_program(&mut self.store, program)?;
        for item in &program.items {
            constraints::run_all(&mut self.store, &mut self.phonebook.alloc, item)?;
        }
        for item in &program.items {
            self.toplevel_item = Some(item.generic.id);
            let result = triage::triage(self, item);
            self.toplevel_item = None;
            result?;
        }
        tracing::debug!(file = self.phonebook.file(), items = program.items.len(), "indexed file");
        Ok(())
    }

    /// Load, index and memoize a module, returning the object type of its
    /// definitions.
    fn require(&mut self, module: &str, span: Span) -> Result<Ty, TypeError> {
        if let Some(ty) = self.modules.get(module) {
            tracing::debug!(module, "module already loaded");
            return Ok(ty.clone());
        }
        if module == self.entry || self.loading.iter().any(|m| m == module) {
            return Err(TypeError::malformed(format!("circular `require` of `{module}`"), span));
        }
        let Some(source) = self.loader.load(module) else {
            return Err(TypeError::ModuleNotFound {
                name: module.to_string(),
                span,
            });
        };
        let program = brie_parser::parse(&source, &mut self.phonebook.alloc)
            .map_err(|err| TypeError::Parse(err).in_module(module))?;

        self.loading.push(module.to_string());
        let saved = self.phonebook.enter_file(module);
        let result = self.index_file(&program);
        self.phonebook.restore_file(saved);
        self.loading.pop();
        result.map_err(|err| err.in_module(module))?;

        let fields: BTreeMap<String, Ty> = self
            .phonebook
            .toplevel(module)
            .iter()
            .map(|toplevel| (toplevel.name.clone(), toplevel.ty.clone()))
            .collect();
        let ty = Ty::Object(fields);
        self.files.push(CheckedFile {
            name: module.to_string(),
            source,
            program,
        });
        self.modules.insert(module.to_string(), ty.clone());
        Ok(ty)
    }

    // ── Types ───────────────────────────────────────────────────────────

    fn record(&mut self, node: &Node, ty: Ty) -> TriageResult {
        if let Some(structural) = ty.structural() {
            let applied = matches!(
                self.store.class_of(node.generic.id),
                Some((_, Type::OpenFunction { .. }))
            );
            if applied {
                return Err(self.not_a_function(node, ty));
            }
            self.store.constrain(node.generic, structural)?;
        }
        tracing::trace!(node = %node.generic, %ty, "resolved");
        self.types.insert(node.generic.id, ty);
        Ok(())
    }

    fn ty_of(&self, node: &Node) -> Ty {
        match self.types.get(&node.generic.id) {
            Some(ty) => ty.clone(),
            None => panic!("internal error: node {} has no type", node.generic),
        }
    }

    /// `node` of type `ty` is applied to an argument. A call that already
    /// completed its function was given too many arguments.
    fn not_a_function(&self, node: &Node, ty: Ty) -> TypeError {
        match self.saturated_arity(node) {
            Some(expected) => TypeError::ArityMismatch {
                expected,
                found: expected + 1,
                span: node.span,
            },
            None => TypeError::NotAFunction {
                ty,
                span: node.span,
            },
        }
    }

    /// When `node` is a call that completed its function, the number of
    /// arguments that function takes.
    fn saturated_arity(&self, node: &Node) -> Option<usize> {
        if node.special_form().is_some() {
            return None;
        }
        let [head, _] = node.parens()? else {
            return None;
        };
        if head.is_tag() {
            return None;
        }
        match self.types.get(&head.generic.id)? {
            Ty::Function {
                arity, arguments, ..
            } if *arity <= 1 => Some(arguments.len() + arity),
            _ => None,
        }
    }

    /// Type of the last line, or `Unit` for no lines.
    fn last_line(&self, lines: &[Node]) -> Ty {
        lines.last().map_or(Ty::Unit, |line| self.ty_of(line))
    }

    fn last_of(&self, lines: &[&Node]) -> Ty {
        lines.last().map_or(Ty::Unit, |line| self.ty_of(line))
    }

    fn expect(&self, node: &Node, expected: Ty) -> TriageResult {
        let found = self.ty_of(node);
        if found == expected {
            Ok(())
        } else {
            Err(TypeError::Mismatch {
                expected: expected.to_string(),
                found,
                span: node.span,
            })
        }
    }

    fn join(first: Ty, rest: impl IntoIterator<Item = Ty>, span: Span) -> Result<Ty, TypeError> {
        rest.into_iter().try_fold(first, |acc, ty| {
            acc.join(&ty).ok_or_else(|| TypeError::Mismatch {
                expected: acc.to_string(),
                found: ty,
                span,
            })
        })
    }

    /// Name resolution: scope stack, then the file's top level, then
    /// builtins.
    fn resolve(&mut self, name: &str, span: Span) -> Result<Ty, TypeError> {
        if let Some(ty) = self.phonebook.lookup(name) {
            return Ok(ty);
        }
        if let Some(toplevel) = self.phonebook.lookup_toplevel(name) {
            return Ok(toplevel.ty.clone());
        }
        if let Some(builtin) = Builtin::from_name(name) {
            return Ok(Ty::builtin(builtin));
        }
        Err(TypeError::UnresolvedReference {
            name: name.to_string(),
            span,
        })
    }

    // ── Calls ───────────────────────────────────────────────────────────

    /// Run a fully applied function.
    fn call(&mut self, node: &Node, callee: &Callee, arguments: &[Ty]) -> Result<Ty, TypeError> {
        let span = node.span;
        match callee {
            Callee::Builtin(builtin) => builtin.apply(arguments, span),
            Callee::Closures(closures) => {
                let results = Phonebook::lookup_function(
                    self,
                    closures,
                    arguments,
                    LookupMode::Expand,
                    |typer, expansion| typer.specialize(expansion, arguments, span),
                )?;
                let mut results = results.into_iter();
                let first = results.next().unwrap_or(Ty::Unit);
                Self::join(first, results, span)
            }
        }
    }

    /// Analyze one specialization of a closure, or reuse its cached result.
    fn specialize(&mut self, expansion: Expansion, arguments: &[Ty], call: Span) -> Result<Ty, TypeError> {
        let Expansion {
            id,
            index,
            first_time,
            body,
        } = expansion;
        if !first_time {
            return match &self.phonebook.specialization(id, index).result {
                Some(ty) => Ok(ty.clone()),
                None => Err(TypeError::RecursiveSpecialization {
                    span: call,
                    definition: body.span,
                }),
            };
        }
        let NodeKind::Block {
            arguments: params,
            children,
        } = &body.kind
        else {
            panic!("internal error: closure {id} is not a block");
        };
        aliaser::bind(&mut self.store, &body)?;
        constraints::run_all(&mut self.store, &mut self.phonebook.alloc, &body)?;

        self.phonebook.enter();
        let result = self.bind_parameters(params, arguments).and_then(|()| triage::lines(self, children));
        self.phonebook.exit();
        result?;

        let ty = self.last_line(children);
        self.phonebook.finish(id, index, ty.clone());
        Ok(ty)
    }

    fn bind_parameters(&mut self, params: &[Binder], arguments: &[Ty]) -> TriageResult {
        for (param, ty) in params.iter().zip(arguments) {
            if let Some(structural) = ty.structural() {
                self.store.constrain(param.generic, structural)?;
            }
            self.phonebook.bind(&param.name, ty.clone());
        }
        Ok(())
    }
}

/// The value of `define main ...`, if `item` is that line.
fn main_value(item: &Node) -> Option<&Node> {
    match item.parens()? {
        [define, name, value] if define.is_ident("define") && name.is_ident("main") => Some(value),
        _ => None,
    }
}

impl PhonebookHost for Typer<'_> {
    fn phonebook(&mut self) -> &mut Phonebook {
        &mut self.phonebook
    }
}

impl Backend for Typer<'_> {
    fn before(&mut self, node: &Node) {
        if !self.seen.insert(node.generic.id) {
            panic!("internal error: node {} was triaged twice", node.generic);
        }
    }

    fn handle_token(&mut self, node: &Node, token: &Token) -> TriageResult {
        let ty = match token.kind {
            TokenKind::Integer => Ty::Int,
            TokenKind::Str => Ty::Str,
            TokenKind::Ident => self.resolve(&token.data, node.span)?,
        };
        self.record(node, ty)
    }

    fn handle_true(&mut self, node: &Node) -> TriageResult {
        self.record(node, Ty::Bool)
    }

    fn handle_false(&mut self, node: &Node) -> TriageResult {
        self.record(node, Ty::Bool)
    }

    fn handle_unit(&mut self, node: &Node) -> TriageResult {
        self.record(node, Ty::Unit)
    }

    fn handle_define(&mut self, node: &Node, name: &Node, value: &Node) -> TriageResult {
        if self.toplevel_item != Some(node.generic.id) {
            return Err(TypeError::malformed(
                "`define` must start a line of a block or of the file",
                node.span,
            ));
        }
        let name = name.ident().unwrap_or_default();
        if self.phonebook.lookup_toplevel(name).is_some() {
            return Err(TypeError::malformed(format!("`{name}` is already defined"), node.span));
        }
        let ty = self.ty_of(value);
        self.phonebook.insert_toplevel(Toplevel {
            name: name.to_string(),
            ty,
            node: node.generic.id,
            is_function: matches!(value.kind, NodeKind::Block { .. }),
        });
        self.record(node, Ty::Unit)
    }

    fn enter_let(&mut self, _node: &Node, name: &Binder, value: &Node) -> TriageResult {
        let ty = self.ty_of(value);
        self.phonebook.enter();
        self.phonebook.bind(&name.name, ty);
        Ok(())
    }

    fn exit_scope(&mut self) {
        self.phonebook.exit();
    }

    fn handle_let(&mut self, node: &Node, _value: &Node, children: &[Node]) -> TriageResult {
        let ty = self.last_line(children);
        self.record(node, ty)
    }

    fn handle_function_call(&mut self, node: &Node, function: &Node, argument: Option<&Node>) -> TriageResult {
        let ty = self.ty_of(function);
        let Some(argument) = argument else {
            return self.record(node, ty);
        };
        let Ty::Function {
            callee,
            arity,
            mut arguments,
        } = ty
        else {
            return Err(self.not_a_function(function, ty));
        };
        let argument_ty = self.ty_of(argument);
        let result = match arity {
            0 if argument_ty == Ty::Unit => self.call(node, &callee, &arguments)?,
            0 => {
                return Err(TypeError::ArityMismatch {
                    expected: 0,
                    found: 1,
                    span: argument.span,
                })
            }
            1 => {
                arguments.push(argument_ty);
                self.call(node, &callee, &arguments)?
            }
            _ => {
                arguments.push(argument_ty);
                Ty::Function {
                    callee,
                    arity: arity - 1,
                    arguments,
                }
            }
        };
        self.record(node, result)
    }

    fn handle_block(&mut self, node: &Node) -> TriageResult {
        let NodeKind::Block { arguments, .. } = &node.kind else {
            unreachable!("handle_block on a non-block node");
        };
        let arity = arguments.len();
        let template = node.deep_copy(&mut self.phonebook.alloc);
        self.phonebook.insert_block(node.generic.id, template);
        self.record(node, Ty::closure(node.generic.id, arity))
    }

    fn handle_object_literal(&mut self, node: &Node, fields: &[Field]) -> TriageResult {
        let fields = fields
            .iter()
            .map(|field| (field.name.clone(), self.ty_of(&field.value)))
            .collect();
        self.record(node, Ty::Object(fields))
    }

    fn handle_dot_access(&mut self, node: &Node, base: &Node, field: &str, field_span: Span) -> TriageResult {
        let ty = match self.ty_of(base) {
            Ty::Object(fields) => match fields.get(field) {
                Some(ty) => ty.clone(),
                None => {
                    return Err(TypeError::NoSuchField {
                        ty: Ty::Object(fields),
                        field: field.to_string(),
                        span: field_span,
                    })
                }
            },
            found => {
                return Err(TypeError::Mismatch {
                    expected: "an object".to_string(),
                    found,
                    span: base.span,
                })
            }
        };
        self.record(node, ty)
    }

    fn handle_if(&mut self, node: &Node, condition: &Node, then: &[Node], otherwise: Option<&[Node]>) -> TriageResult {
        self.expect(condition, Ty::Bool)?;
        let ty = match otherwise {
            Some(otherwise) => {
                let first = self.last_line(then);
                Self::join(first, [self.last_line(otherwise)], node.span)?
            }
            None => Ty::Unit,
        };
        self.record(node, ty)
    }

    fn handle_while(&mut self, node: &Node, condition: &Node, _body: &[Node]) -> TriageResult {
        self.expect(condition, Ty::Bool)?;
        self.record(node, Ty::Unit)
    }

    fn handle_update(&mut self, node: &Node, target: &Node, value: &Node) -> TriageResult {
        if !matches!(target.kind, NodeKind::DotAccess { .. }) {
            return Err(TypeError::malformed(
                "`_update` needs a field access as its target",
                target.span,
            ));
        }
        self.expect(value, self.ty_of(target))?;
        self.record(node, Ty::Unit)
    }

    fn handle_type_check(&mut self, node: &Node, expr: &Node, type_name: &Node) -> TriageResult {
        let expected = match type_name.ident() {
            Some("Int") => Ty::Int,
            Some("Str") => Ty::Str,
            Some("Bool") => Ty::Bool,
            Some("Unit") => Ty::Unit,
            _ => {
                return Err(TypeError::malformed(
                    "`::` checks against Int, Str, Bool or Unit",
                    type_name.span,
                ))
            }
        };
        self.expect(expr, expected)?;
        let ty = self.ty_of(expr);
        self.record(node, ty)
    }

    fn enter_arm(&mut self, value: &Node, arm: &Arm<'_>) -> Result<bool, TypeError> {
        let ty = self.ty_of(value);
        let Ty::Variant(cases) = &ty else {
            return Err(TypeError::Mismatch {
                expected: "a variant".to_string(),
                found: ty,
                span: value.span,
            });
        };
        let bound: Vec<(&Node, Ty)> = match cases.get(arm.tag) {
            None => {
                tracing::trace!(tag = arm.tag, value = %ty, "arm cannot be taken");
                return Ok(false);
            }
            Some(arguments) if arguments.len() != arm.binders.len() => {
                return Err(TypeError::ArityMismatch {
                    expected: arguments.len(),
                    found: arm.binders.len(),
                    span: arm.pattern.span,
                })
            }
            Some(arguments) => arm.binders.iter().copied().zip(arguments.iter().cloned()).collect(),
        };
        for (binder, ty) in &bound {
            if let Some(structural) = ty.structural() {
                self.store.constrain(binder.generic, structural)?;
            }
        }
        self.phonebook.enter();
        for (binder, ty) in bound {
            self.phonebook.bind(binder.ident().unwrap_or_default(), ty);
        }
        Ok(true)
    }

    fn handle_match(&mut self, node: &Node, _value: &Node, arms: &[Arm<'_>]) -> TriageResult {
        let mut results = arms.iter().map(|arm| self.last_of(&arm.body));
        let first = results.next().unwrap_or(Ty::Unit);
        let rest: Vec<Ty> = results.collect();
        let ty = Self::join(first, rest, node.span)?;
        self.record(node, ty)
    }

    fn handle_variant(&mut self, node: &Node, tag: &str, arguments: &[Node]) -> TriageResult {
        let arguments = arguments.iter().map(|arg| self.ty_of(arg)).collect();
        self.record(node, Ty::Variant(BTreeMap::from([(tag.to_string(), arguments)])))
    }

    fn handle_inlay(&mut self, node: &Node, _text: &str) -> TriageResult {
        self.record(node, Ty::Unit)
    }

    fn handle_require(&mut self, node: &Node, module: &str) -> TriageResult {
        if self.toplevel_item != Some(node.generic.id) {
            return Err(TypeError::malformed(
                "`require` may only appear at the top level",
                node.span,
            ));
        }
        let ty = self.require(module, node.span)?;
        if self.phonebook.lookup_toplevel(module).is_none() {
            self.phonebook.insert_toplevel(Toplevel {
                name: module.to_string(),
                ty: ty.clone(),
                node: node.generic.id,
                is_function: false,
            });
        }
        self.record(node, ty)
    }
}

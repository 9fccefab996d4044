//! Brie semantic analysis.
//!
//! Structural type inference over the Brie AST plus monomorphization of
//! closures. The pipeline for one file is:
//!
//! 1. [`aliaser`] wires every identifier to the generic of its binding;
//! 2. [`constraints`] feeds structural facts into the [`store::Typetable`];
//! 3. the type backend in [`typer`] walks the program through the shared
//!    [`triage`] protocol, resolving a concrete [`ty::Ty`] for every node it
//!    evaluates and specializing closures per argument-type tuple in the
//!    [`phonebook`].
//!
//! The result ([`TypeckResult`]) is what the code generator consumes.

pub mod aliaser;
pub mod builtins;
pub mod constraints;
pub mod diagnostics;
pub mod error;
pub mod phonebook;
pub mod store;
pub mod triage;
pub mod ty;
pub mod typer;

use std::collections::HashMap;
use std::fmt::Write;
use std::hash::BuildHasher;

use rustc_hash::FxHashMap;

use brie_common::{GenericAllocator, GenericId};
use brie_parser::{Node, NodeKind, Program};

use crate::error::TypeError;
use crate::phonebook::Phonebook;
use crate::store::Typetable;
use crate::ty::Ty;
use crate::typer::{CheckedFile, Typer};

/// Source provider for `require`.
pub trait ModuleLoader {
    /// The source text of module `name`, or `None` if there is no such
    /// module.
    fn load(&mut self, name: &str) -> Option<String>;
}

impl<S: BuildHasher> ModuleLoader for HashMap<String, String, S> {
    fn load(&mut self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Everything the analysis of one program produced.
#[derive(Debug)]
pub struct TypeckResult {
    /// Name of the entry file.
    pub entry: String,
    /// Every analyzed file. Required modules come before the files that
    /// require them; the entry file is last.
    pub files: Vec<CheckedFile>,
    /// Resolved type of every evaluated node, keyed by its generic.
    pub types: FxHashMap<GenericId, Ty>,
    pub store: Typetable,
    pub phonebook: Phonebook,
    /// Position of `define main` among the entry file's lines.
    pub main_index: usize,
}

impl TypeckResult {
    pub fn ty(&self, node: &Node) -> Option<&Ty> {
        self.types.get(&node.generic.id)
    }

    pub fn file(&self, name: &str) -> Option<&CheckedFile> {
        self.files.iter().find(|file| file.name == name)
    }

    pub fn entry_file(&self) -> &CheckedFile {
        self.files
            .last()
            .expect("the entry file is always recorded")
    }

    /// The lines of the entry file's `main` block.
    pub fn main_lines(&self) -> &[Node] {
        let main = &self.entry_file().program.items[self.main_index];
        match main.parens() {
            Some([_, _, value]) => match &value.kind {
                NodeKind::Block { children, .. } => children.as_slice(),
                _ => &[],
            },
            _ => &[],
        }
    }

    /// Equivalence classes of the store and the resolved type of every line
    /// of `main`, for `--dump-types`.
    pub fn dump_types(&mut self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "classes:");
        for (members, ty) in self.store.classes() {
            let members: Vec<String> = members.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "  {}: {ty}", members.join(" "));
        }
        let _ = writeln!(out, "main:");
        for line in self.main_lines() {
            let ty = self
                .ty(line)
                .map_or_else(|| "?".to_string(), ToString::to_string);
            let _ = writeln!(out, "  {line} : {ty}");
        }
        out
    }
}

/// Parse and analyze the entry file `entry` with source `source`, loading
/// required modules through `loader`.
pub fn check(entry: &str, source: &str, loader: &mut dyn ModuleLoader) -> Result<TypeckResult, TypeError> {
    let mut alloc = GenericAllocator::new();
    let program = brie_parser::parse(source, &mut alloc).map_err(TypeError::Parse)?;
    check_program(entry, source, program, alloc, loader)
}

/// Analyze an already parsed entry file. `alloc` must be the allocator the
/// program was parsed with.
pub fn check_program(
    entry: &str,
    source: &str,
    program: Program,
    alloc: GenericAllocator,
    loader: &mut dyn ModuleLoader,
) -> Result<TypeckResult, TypeError> {
    let mut typer = Typer::new(entry, alloc, loader);
    let main_index = typer.check_entry(&program).map_err(|err| match err {
        TypeError::InModule { module, error } if module == entry => *error,
        err => err,
    })?;
    tracing::debug!(
        closures = typer.phonebook.functions().count(),
        specializations = typer.phonebook.each_expansion().count(),
        "analysis finished"
    );
    let Typer {
        store,
        phonebook,
        types,
        mut files,
        ..
    } = typer;
    files.push(CheckedFile {
        name: entry.to_string(),
        source: source.to_string(),
        program,
    });
    Ok(TypeckResult {
        entry: entry.to_string(),
        files,
        types,
        store,
        phonebook,
        main_index,
    })
}

//! Monomorphization registry ("phonebook").
//!
//! Holds every closure literal seen during analysis together with the scope
//! stack in effect where it was written, and one deep-copied, separately
//! analyzed body per concrete argument-type tuple it has been called with.
//! It also owns the run-time name table used while evaluating: a stack of
//! frames for block parameters and `let`s, and a per-file table of top-level
//! definitions.
//!
//! Calling a closure swaps the caller's stack for the closure's snapshot, so
//! the body sees its lexical environment rather than the caller's. Names the
//! body resolves below the snapshot's top are recorded as captures.

use std::collections::BTreeSet;
use std::mem;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use brie_common::{GenericAllocator, GenericId};
use brie_parser::{Node, NodeKind};

use crate::error::TypeError;
use crate::ty::{ClosureId, Ty};

pub type Frame = FxHashMap<String, Ty>;

/// One cached specialization of a closure.
#[derive(Debug)]
pub struct Specialization {
    pub arguments: Vec<Ty>,
    /// Deep copy of the closure literal, a `Block` node.
    pub body: Rc<Node>,
    /// `None` while the body is still being analyzed.
    pub result: Option<Ty>,
}

/// Permanent record of one closure literal.
#[derive(Debug)]
pub struct PhoneFunction {
    pub id: ClosureId,
    /// Module the literal was written in.
    pub file: String,
    template: Node,
    stack: Vec<Frame>,
    possibly: BTreeSet<String>,
    found: BTreeSet<String>,
    children: Vec<ClosureId>,
    expansions: Vec<Specialization>,
    index: FxHashMap<Vec<Ty>, usize>,
}

impl PhoneFunction {
    /// Parameter names of the literal, in order.
    pub fn parameters(&self) -> Vec<&str> {
        match &self.template.kind {
            NodeKind::Block { arguments, .. } => {
                arguments.iter().map(|binder| binder.name.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn expansions(&self) -> &[Specialization] {
        &self.expansions
    }

    /// Every name visible where the literal was written.
    pub fn possibly(&self) -> &BTreeSet<String> {
        &self.possibly
    }
}

/// A top-level definition of one file.
#[derive(Clone, Debug)]
pub struct Toplevel {
    pub name: String,
    pub ty: Ty,
    /// Generic of the defining `define` form.
    pub node: GenericId,
    pub is_function: bool,
}

/// How `lookup_function` obtains the body for an argument tuple.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LookupMode {
    /// Create and cache the specialization on first request.
    Expand,
    /// The specialization must already exist.
    Fetch,
}

/// One body handed to the `lookup_function` callback.
#[derive(Clone, Debug)]
pub struct Expansion {
    pub id: ClosureId,
    pub index: usize,
    pub first_time: bool,
    pub body: Rc<Node>,
}

/// Anything that owns a phonebook and can be re-entered while one of its
/// closures is being called.
pub trait PhonebookHost {
    fn phonebook(&mut self) -> &mut Phonebook;
}

#[derive(Debug)]
struct Active {
    id: ClosureId,
    base: usize,
}

/// Caller state put aside while another file is indexed.
#[derive(Debug)]
pub struct SavedFile {
    names: Vec<Frame>,
    file: String,
    active: Vec<Active>,
}

#[derive(Debug)]
pub struct Phonebook {
    pub alloc: GenericAllocator,
    names: Vec<Frame>,
    file: String,
    toplevel: FxHashMap<String, Vec<Toplevel>>,
    functions: FxHashMap<ClosureId, PhoneFunction>,
    order: Vec<ClosureId>,
    active: Vec<Active>,
}

impl Phonebook {
    pub fn new(alloc: GenericAllocator, file: &str) -> Self {
        Phonebook {
            alloc,
            names: vec![Frame::default()],
            file: file.to_string(),
            toplevel: FxHashMap::default(),
            functions: FxHashMap::default(),
            order: Vec::new(),
            active: Vec::new(),
        }
    }

    // ── Scope stack ─────────────────────────────────────────────────────

    pub fn enter(&mut self) {
        self.names.push(Frame::default());
    }

    /// Pop the innermost frame.
    ///
    /// # Panics
    ///
    /// Panics when asked to pop the base frame.
    pub fn exit(&mut self) {
        assert!(self.names.len() > 1, "cannot pop the base scope");
        self.names.pop();
    }

    pub fn depth(&self) -> usize {
        self.names.len()
    }

    /// Bind `name` in the innermost frame.
    pub fn bind(&mut self, name: &str, ty: Ty) {
        self.names
            .last_mut()
            .expect("scope stack should never be empty")
            .insert(name.to_string(), ty);
    }

    /// Resolve `name` on the scope stack, recording a capture when it comes
    /// from the environment of the closure being analyzed.
    pub fn lookup(&mut self, name: &str) -> Option<Ty> {
        let (depth, ty) = self
            .names
            .iter()
            .enumerate()
            .rev()
            .find_map(|(depth, frame)| frame.get(name).map(|ty| (depth, ty.clone())))?;
        if let Some(active) = self.active.last() {
            if depth < active.base {
                let id = active.id;
                self.function_mut(id).found.insert(name.to_string());
            }
        }
        Some(ty)
    }

    /// Swap in a fresh base scope for indexing another file. The caller's
    /// state comes back with [`Phonebook::restore_file`].
    pub fn enter_file(&mut self, file: &str) -> SavedFile {
        tracing::debug!(file, "entering file");
        SavedFile {
            names: mem::replace(&mut self.names, vec![Frame::default()]),
            file: mem::replace(&mut self.file, file.to_string()),
            active: mem::take(&mut self.active),
        }
    }

    pub fn restore_file(&mut self, saved: SavedFile) {
        self.names = saved.names;
        self.file = saved.file;
        self.active = saved.active;
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    // ── Top level ───────────────────────────────────────────────────────

    pub fn insert_toplevel(&mut self, toplevel: Toplevel) {
        self.toplevel
            .entry(self.file.clone())
            .or_default()
            .push(toplevel);
    }

    /// A definition of the current file.
    pub fn lookup_toplevel(&self, name: &str) -> Option<&Toplevel> {
        self.toplevel
            .get(&self.file)?
            .iter()
            .find(|toplevel| toplevel.name == name)
    }

    /// Every definition of `file`, in definition order.
    pub fn toplevel(&self, file: &str) -> &[Toplevel] {
        self.toplevel.get(file).map(Vec::as_slice).unwrap_or_default()
    }

    /// The top-level definitions of `file` that are not functions.
    pub fn toplevel_extras(&self, file: &str) -> impl Iterator<Item = &Toplevel> {
        self.toplevel(file).iter().filter(|toplevel| !toplevel.is_function)
    }

    pub fn toplevel_functions(&self, file: &str) -> impl Iterator<Item = &Toplevel> {
        self.toplevel(file).iter().filter(|toplevel| toplevel.is_function)
    }

    // ── Closures ────────────────────────────────────────────────────────

    /// Register a closure literal, snapshotting the current scope stack as
    /// its environment. `template` must be a `Block` node.
    ///
    /// # Panics
    ///
    /// Panics if `id` was already registered: every literal is evaluated
    /// exactly once.
    pub fn insert_block(&mut self, id: ClosureId, template: Node) {
        let possibly = self
            .names
            .iter()
            .flat_map(|frame| frame.keys().cloned())
            .collect();
        if let Some(parent) = self.active.last().map(|active| active.id) {
            self.function_mut(parent).children.push(id);
        }
        let function = PhoneFunction {
            id,
            file: self.file.clone(),
            template,
            stack: self.names.clone(),
            possibly,
            found: BTreeSet::new(),
            children: Vec::new(),
            expansions: Vec::new(),
            index: FxHashMap::default(),
        };
        let previous = self.functions.insert(id, function);
        assert!(
            previous.is_none(),
            "internal error: closure {id} was registered twice"
        );
        self.order.push(id);
        tracing::debug!(closure = %id, "registered closure");
    }

    /// The record for closure `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was never registered.
    pub fn function(&self, id: ClosureId) -> &PhoneFunction {
        match self.functions.get(&id) {
            Some(function) => function,
            None => panic!("internal error: closure {id} was never registered"),
        }
    }

    fn function_mut(&mut self, id: ClosureId) -> &mut PhoneFunction {
        match self.functions.get_mut(&id) {
            Some(function) => function,
            None => panic!("internal error: closure {id} was never registered"),
        }
    }

    /// Specialization of closure `id` for `arguments`, creating a fresh deep
    /// copy of its body on first request. Returns whether it was created by
    /// this call and its index.
    pub fn expand(&mut self, id: ClosureId, arguments: &[Ty]) -> (bool, usize) {
        if let Some(&index) = self.function(id).index.get(arguments) {
            return (false, index);
        }
        let template = match self.functions.get(&id) {
            Some(function) => &function.template,
            None => panic!("internal error: closure {id} was never registered"),
        };
        let body = Rc::new(template.deep_copy(&mut self.alloc));
        let function = self.function_mut(id);
        let index = function.expansions.len();
        function.expansions.push(Specialization {
            arguments: arguments.to_vec(),
            body,
            result: None,
        });
        function.index.insert(arguments.to_vec(), index);
        tracing::debug!(closure = %id, key = %Ty::key(arguments), "new specialization");
        (true, index)
    }

    /// Index of an existing specialization.
    pub fn fetch(&self, id: ClosureId, arguments: &[Ty]) -> Option<usize> {
        self.function(id).index.get(arguments).copied()
    }

    pub fn specialization(&self, id: ClosureId, index: usize) -> &Specialization {
        &self.function(id).expansions[index]
    }

    /// Record the result type of a finished specialization.
    pub fn finish(&mut self, id: ClosureId, index: usize, result: Ty) {
        self.function_mut(id).expansions[index].result = Some(result);
    }

    /// Names closure `id` must capture: those its bodies (or closures
    /// created inside them) actually read that were visible where it was
    /// written. Sorted.
    pub fn lookup_found(&self, id: ClosureId) -> Vec<String> {
        let function = self.function(id);
        let mut found = function.found.clone();
        for &child in &function.children {
            found.extend(self.lookup_found(child));
        }
        found
            .into_iter()
            .filter(|name| function.possibly.contains(name))
            .collect()
    }

    /// Every registered closure, in registration order.
    pub fn functions(&self) -> impl Iterator<Item = &PhoneFunction> {
        self.order.iter().map(|id| self.function(*id))
    }

    /// Every cached specialization, grouped by closure in registration order.
    pub fn each_expansion(&self) -> impl Iterator<Item = (&PhoneFunction, &Specialization)> {
        self.functions()
            .flat_map(|function| function.expansions.iter().map(move |spec| (function, spec)))
    }

    /// Run `f` on the body of every closure in `closures` specialized for
    /// `arguments`, each inside its own restored environment. The caller's
    /// scope stack is put back on every path, including errors.
    ///
    /// # Panics
    ///
    /// In [`LookupMode::Fetch`], panics if a specialization is missing.
    pub fn lookup_function<H, R>(
        host: &mut H,
        closures: &BTreeSet<ClosureId>,
        arguments: &[Ty],
        mode: LookupMode,
        mut f: impl FnMut(&mut H, Expansion) -> Result<R, TypeError>,
    ) -> Result<Vec<R>, TypeError>
    where
        H: PhonebookHost,
    {
        let mut results = Vec::with_capacity(closures.len());
        for &id in closures {
            let book = host.phonebook();
            let (first_time, index) = match mode {
                LookupMode::Expand => book.expand(id, arguments),
                LookupMode::Fetch => match book.fetch(id, arguments) {
                    Some(index) => (false, index),
                    None => panic!(
                        "internal error: closure {id} has no specialization for ({})",
                        Ty::key(arguments)
                    ),
                },
            };
            let function = book.function(id);
            let body = Rc::clone(&function.expansions[index].body);
            let stack = function.stack.clone();
            let file = function.file.clone();
            let saved_names = mem::replace(&mut book.names, stack);
            let saved_file = mem::replace(&mut book.file, file.clone());
            let base = book.names.len();
            book.active.push(Active { id, base });

            let expansion = Expansion {
                id,
                index,
                first_time,
                body,
            };
            let result = f(host, expansion);

            let book = host.phonebook();
            book.active.pop();
            book.names = saved_names;
            book.file = saved_file;
            results.push(result.map_err(|err| err.in_module(&file))?);
        }
        Ok(results)
    }
}

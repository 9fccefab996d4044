//! Equivalence store ("typetable").
//!
//! Partitions generics into equivalence classes and maps each class to the
//! structural [`Type`] known so far. Classes are tracked with `ena`'s
//! union-find table keyed by generic index; the class -> type map is keyed
//! by the class root. A generic is *free* while its root has no entry in
//! that map, and belongs to a class as soon as it has been constrained or
//! aliased.
//!
//! Structural types refer to other program points through generics rather
//! than nested types, so refining e.g. the type of an object field later is
//! just another constraint on the field's generic.

use std::collections::BTreeMap;
use std::fmt;

use ena::unify::{InPlaceUnificationTable, UnifyKey};
use rustc_hash::FxHashMap;

use brie_common::{Generic, GenericAllocator, GenericId, Span};

use crate::error::TypeError;

/// Union-find key: the index of a generic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct Var(u32);

impl UnifyKey for Var {
    type Value = ();

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(u: u32) -> Self {
        Var(u)
    }

    fn tag() -> &'static str {
        "Var"
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    Integer,
    String,
    Boolean,
    Unit,
}

impl fmt::Display for LiteralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LiteralKind::Integer => "Int",
            LiteralKind::String => "Str",
            LiteralKind::Boolean => "Bool",
            LiteralKind::Unit => "Unit",
        };
        write!(f, "{name}")
    }
}

/// Structural knowledge about one equivalence class.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Unknown,
    Literal(LiteralKind),
    /// A closure literal taking `param` and producing `result`.
    FunctionLiteral { param: Generic, result: Generic },
    /// Something applied to `param`, producing `result`.
    OpenFunction { param: Generic, result: Generic },
    /// An object literal with exactly these fields.
    ClosedObject { fields: BTreeMap<String, Generic> },
    /// A value known to have at least these fields.
    OpenObject { fields: BTreeMap<String, Generic> },
    Variant {
        cases: BTreeMap<String, Vec<Generic>>,
        locations: BTreeMap<String, Span>,
    },
}

impl Type {
    pub fn variant(tag: &str, arguments: Vec<Generic>, location: Span) -> Type {
        Type::Variant {
            cases: BTreeMap::from([(tag.to_string(), arguments)]),
            locations: BTreeMap::from([(tag.to_string(), location)]),
        }
    }
}

fn field_list(fields: &BTreeMap<String, Generic>) -> String {
    fields.keys().cloned().collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unknown => write!(f, "an unknown type"),
            Type::Literal(kind) => write!(f, "{kind}"),
            Type::FunctionLiteral { .. } => write!(f, "a function literal"),
            Type::OpenFunction { .. } => write!(f, "a function"),
            Type::ClosedObject { fields } => write!(f, "object <{}>", field_list(fields)),
            Type::OpenObject { fields } => {
                write!(f, "an object with field(s) {}", field_list(fields))
            }
            Type::Variant { cases, .. } => {
                let tags: Vec<&str> = cases.keys().map(String::as_str).collect();
                write!(f, "variant ({})", tags.join(" | "))
            }
        }
    }
}

/// The equivalence store.
#[derive(Debug)]
pub struct Typetable {
    table: InPlaceUnificationTable<Var>,
    classes: FxHashMap<Var, Type>,
}

impl Typetable {
    pub fn new() -> Self {
        Typetable {
            table: InPlaceUnificationTable::new(),
            classes: FxHashMap::default(),
        }
    }

    /// Issue a fresh generic and make room for it in the table.
    pub fn fresh(&mut self, alloc: &mut GenericAllocator, span: Span) -> Generic {
        let generic = alloc.fresh(span);
        self.var(generic.id);
        generic
    }

    /// Union-find key for `id`, growing the table to cover it.
    fn var(&mut self, id: GenericId) -> Var {
        while self.table.len() <= id.index() {
            self.table.new_key(());
        }
        Var(id.0)
    }

    /// The class containing `id`, as its root and type, or `None` while the
    /// generic is still free.
    pub fn class_of(&mut self, id: GenericId) -> Option<(GenericId, &Type)> {
        if id.index() >= self.table.len() {
            return None;
        }
        let root = self.table.find(Var(id.0));
        self.classes.get(&root).map(|ty| (GenericId(root.0), ty))
    }

    pub fn same_class(&mut self, a: GenericId, b: GenericId) -> bool {
        let a = self.class_of(a).map(|(root, _)| root);
        let b = self.class_of(b).map(|(root, _)| root);
        match (a, b) {
            (Some(ra), Some(rb)) => ra == rb,
            _ => false,
        }
    }

    /// Require the class of `generic` to be compatible with `ty`.
    pub fn constrain(&mut self, generic: Generic, ty: Type) -> Result<(), TypeError> {
        tracing::trace!(%generic, %ty, "constrain");
        let key = self.var(generic.id);
        let root = self.table.find(key);
        let current = self.classes.remove(&root).unwrap_or(Type::Unknown);
        let merged = self.merge(current, ty, generic.span, generic.span)?;
        self.install(key, merged, generic.span, generic.span)
    }

    /// Put `a` and `b` into the same class.
    pub fn alias(&mut self, a: Generic, b: Generic) -> Result<(), TypeError> {
        tracing::trace!(%a, %b, "alias");
        let (ka, kb) = (self.var(a.id), self.var(b.id));
        let (ra, rb) = (self.table.find(ka), self.table.find(kb));
        if ra == rb {
            self.classes.entry(ra).or_insert(Type::Unknown);
            return Ok(());
        }
        let left = self.classes.remove(&ra);
        let right = self.classes.remove(&rb);
        self.table.union(ka, kb);
        let merged = match (left, right) {
            (None, None) => Type::Unknown,
            (Some(ty), None) | (None, Some(ty)) => ty,
            (Some(left), Some(right)) => self.merge(left, right, a.span, b.span)?,
        };
        self.install(ka, merged, a.span, b.span)
    }

    /// Store `ty` for the class of `key`. Merging may alias generics into
    /// this very class, so any type that appeared meanwhile is merged in.
    fn install(&mut self, key: Var, ty: Type, span: Span, other: Span) -> Result<(), TypeError> {
        let root = self.table.find(key);
        match self.classes.remove(&root) {
            None => {
                self.classes.insert(root, ty);
                Ok(())
            }
            Some(existing) => {
                let merged = self.merge(existing, ty, span, other)?;
                self.install(key, merged, span, other)
            }
        }
    }

    /// Unify two structural types, aliasing the generics they refer to.
    pub fn merge(&mut self, left: Type, right: Type, span: Span, other: Span) -> Result<Type, TypeError> {
        let conflict = |left: &Type, right: &Type| TypeError::Conflict {
            left: left.to_string(),
            right: right.to_string(),
            span,
            other,
        };
        match (left, right) {
            (Type::Unknown, ty) | (ty, Type::Unknown) => Ok(ty),
            (Type::Literal(a), Type::Literal(b)) if a == b => Ok(Type::Literal(a)),
            (Type::FunctionLiteral { param, result }, Type::OpenFunction { param: p, result: r })
            | (Type::OpenFunction { param: p, result: r }, Type::FunctionLiteral { param, result }) => {
                self.alias(p, param)?;
                self.alias(r, result)?;
                Ok(Type::FunctionLiteral { param, result })
            }
            (Type::OpenFunction { param, result }, Type::OpenFunction { param: p, result: r }) => {
                self.alias(param, p)?;
                self.alias(result, r)?;
                Ok(Type::OpenFunction { param, result })
            }
            (Type::OpenObject { fields: mut a }, Type::OpenObject { fields: b }) => {
                for (name, generic) in b {
                    match a.get(&name) {
                        Some(&existing) => self.alias(existing, generic)?,
                        None => {
                            a.insert(name, generic);
                        }
                    }
                }
                Ok(Type::OpenObject { fields: a })
            }
            (Type::OpenObject { fields: open }, Type::ClosedObject { fields: closed })
            | (Type::ClosedObject { fields: closed }, Type::OpenObject { fields: open }) => {
                if let Some(missing) = open.keys().find(|name| !closed.contains_key(*name)) {
                    return Err(TypeError::Conflict {
                        left: format!("object <{}>", field_list(&closed)),
                        right: format!("an object with field `{missing}`"),
                        span,
                        other,
                    });
                }
                for (name, generic) in &open {
                    self.alias(*generic, closed[name])?;
                }
                Ok(Type::ClosedObject { fields: closed })
            }
            (Type::ClosedObject { fields: a }, Type::ClosedObject { fields: b })
                if a.keys().eq(b.keys()) =>
            {
                for (name, generic) in &b {
                    self.alias(a[name], *generic)?;
                }
                Ok(Type::ClosedObject { fields: a })
            }
            (
                Type::Variant {
                    mut cases,
                    mut locations,
                },
                Type::Variant {
                    cases: other_cases,
                    locations: other_locations,
                },
            ) => {
                for (tag, arguments) in other_cases {
                    match cases.get(&tag) {
                        Some(existing) if existing.len() != arguments.len() => {
                            return Err(TypeError::Conflict {
                                left: format!("`{tag}` with {} argument(s)", existing.len()),
                                right: format!("`{tag}` with {} argument(s)", arguments.len()),
                                span: locations.get(&tag).copied().unwrap_or(span),
                                other: other_locations.get(&tag).copied().unwrap_or(other),
                            });
                        }
                        Some(existing) => {
                            let pairs: Vec<(Generic, Generic)> =
                                existing.iter().copied().zip(arguments).collect();
                            for (a, b) in pairs {
                                self.alias(a, b)?;
                            }
                        }
                        None => {
                            cases.insert(tag, arguments);
                        }
                    }
                }
                for (tag, location) in other_locations {
                    locations.entry(tag).or_insert(location);
                }
                Ok(Type::Variant { cases, locations })
            }
            (left, right) => Err(conflict(&left, &right)),
        }
    }

    /// Every class as its sorted member list and type, ordered by the
    /// smallest member.
    pub fn classes(&mut self) -> Vec<(Vec<GenericId>, Type)> {
        let mut members: FxHashMap<Var, Vec<GenericId>> = FxHashMap::default();
        for index in 0..self.table.len() as u32 {
            let root = self.table.find(Var(index));
            if self.classes.contains_key(&root) {
                members.entry(root).or_default().push(GenericId(index));
            }
        }
        let mut classes: Vec<(Vec<GenericId>, Type)> = members
            .into_iter()
            .map(|(root, ids)| (ids, self.classes[&root].clone()))
            .collect();
        classes.sort_by_key(|(ids, _)| ids[0]);
        classes
    }

    /// Human-readable type of the class containing `id`.
    pub fn resolve_display(&mut self, id: GenericId) -> String {
        match self.class_of(id) {
            Some((_, ty)) => ty.to_string(),
            None => "free".to_string(),
        }
    }
}

impl Default for Typetable {
    fn default() -> Self {
        Self::new()
    }
}

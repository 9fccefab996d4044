//! Resolved (concrete) types.
//!
//! The equivalence store in [`crate::store`] tracks partial, structural
//! knowledge about generics. Once a node has actually been evaluated by the
//! type backend its type is fully known and described by a [`Ty`]. These are
//! the types used as specialization keys, so they are plain values with
//! structural equality, hashing and a total order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use brie_common::GenericId;

use crate::builtins::Builtin;
use crate::store::{LiteralKind, Type};

/// Identity of a closure literal: the generic of its block node.
pub type ClosureId = GenericId;

/// What a function value will run once all of its arguments are supplied.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Callee {
    Builtin(Builtin),
    /// One or more closure literals. Several origins appear when values
    /// from different closures meet, e.g. in the two branches of an `if`.
    Closures(BTreeSet<ClosureId>),
}

impl Callee {
    pub fn closure(id: ClosureId) -> Callee {
        Callee::Closures(BTreeSet::from([id]))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ty {
    Int,
    Str,
    Bool,
    Unit,
    /// A function value still waiting for `arity` arguments, with the
    /// arguments already supplied by partial application.
    Function {
        callee: Callee,
        arity: usize,
        arguments: Vec<Ty>,
    },
    Object(BTreeMap<String, Ty>),
    Variant(BTreeMap<String, Vec<Ty>>),
}

impl Ty {
    pub fn closure(id: ClosureId, arity: usize) -> Ty {
        Ty::Function {
            callee: Callee::closure(id),
            arity,
            arguments: Vec::new(),
        }
    }

    pub fn builtin(builtin: Builtin) -> Ty {
        Ty::Function {
            callee: Callee::Builtin(builtin),
            arity: builtin.arity(),
            arguments: Vec::new(),
        }
    }

    /// Int, Str, Bool or Unit.
    pub fn is_atomic(&self) -> bool {
        matches!(self, Ty::Int | Ty::Str | Ty::Bool | Ty::Unit)
    }

    /// Least type covering both `self` and `other`, if there is one.
    ///
    /// Equal types join to themselves, variants union their tags (a shared
    /// tag must agree on its arguments), and function values of the same
    /// shape union their closure sets.
    pub fn join(&self, other: &Ty) -> Option<Ty> {
        if self == other {
            return Some(self.clone());
        }
        match (self, other) {
            (Ty::Variant(a), Ty::Variant(b)) => {
                let mut cases = a.clone();
                for (tag, args) in b {
                    match cases.get(tag) {
                        Some(existing) if existing.len() != args.len() => return None,
                        Some(existing) => {
                            let joined = existing
                                .iter()
                                .zip(args)
                                .map(|(x, y)| x.join(y))
                                .collect::<Option<Vec<_>>>()?;
                            cases.insert(tag.clone(), joined);
                        }
                        None => {
                            cases.insert(tag.clone(), args.clone());
                        }
                    }
                }
                Some(Ty::Variant(cases))
            }
            (
                Ty::Function {
                    callee: Callee::Closures(a),
                    arity: arity_a,
                    arguments: args_a,
                },
                Ty::Function {
                    callee: Callee::Closures(b),
                    arity: arity_b,
                    arguments: args_b,
                },
            ) if arity_a == arity_b && args_a == args_b => Some(Ty::Function {
                callee: Callee::Closures(a.union(b).copied().collect()),
                arity: *arity_a,
                arguments: args_a.clone(),
            }),
            (Ty::Object(a), Ty::Object(b)) if a.len() == b.len() => {
                let mut fields = BTreeMap::new();
                for (name, ty) in a {
                    fields.insert(name.clone(), ty.join(b.get(name)?)?);
                }
                Some(Ty::Object(fields))
            }
            _ => None,
        }
    }

    /// The structural fact this type contributes back to the equivalence
    /// store. Only atomic types are reported.
    pub fn structural(&self) -> Option<Type> {
        let kind = match self {
            Ty::Int => LiteralKind::Integer,
            Ty::Str => LiteralKind::String,
            Ty::Bool => LiteralKind::Boolean,
            Ty::Unit => LiteralKind::Unit,
            _ => return None,
        };
        Some(Type::Literal(kind))
    }

    /// Specialization key for a tuple of argument types. The same text is
    /// produced by the generated code at run time.
    pub fn key(arguments: &[Ty]) -> String {
        arguments
            .iter()
            .map(Ty::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Builtin(b) => write!(f, "{}", b.name()),
            Callee::Closures(ids) => {
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "#{}", id.0)?;
                }
                Ok(())
            }
        }
    }
}

// Never emits a comma: argument types are joined with `,` to form keys.
impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int => write!(f, "Int"),
            Ty::Str => write!(f, "Str"),
            Ty::Bool => write!(f, "Bool"),
            Ty::Unit => write!(f, "Unit"),
            Ty::Function {
                callee,
                arity,
                arguments,
            } => {
                write!(f, "fn {callee}[")?;
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, "]/{arity}")
            }
            Ty::Object(fields) => {
                write!(f, "{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, "}}")
            }
            Ty::Variant(cases) => {
                write!(f, "(")?;
                for (i, (tag, args)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{tag}")?;
                    for arg in args {
                        write!(f, " {arg}")?;
                    }
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(cases: &[(&str, Vec<Ty>)]) -> Ty {
        Ty::Variant(
            cases
                .iter()
                .map(|(tag, args)| (tag.to_string(), args.clone()))
                .collect(),
        )
    }

    #[test]
    fn display_never_contains_commas() {
        let ty = Ty::Object(BTreeMap::from([
            ("a".to_string(), Ty::Int),
            ("b".to_string(), variant(&[("Some", vec![Ty::Str]), ("None", vec![])])),
        ]));
        assert_eq!(ty.to_string(), "{a: Int b: (None | Some Str)}");
        assert_eq!(Ty::key(&[Ty::Int, ty]), "Int,{a: Int b: (None | Some Str)}");
    }

    #[test]
    fn variants_join_tag_wise() {
        let some = variant(&[("Some", vec![Ty::Int])]);
        let none = variant(&[("None", vec![])]);
        assert_eq!(
            some.join(&none),
            Some(variant(&[("None", vec![]), ("Some", vec![Ty::Int])]))
        );
        let pair = variant(&[("Some", vec![Ty::Int, Ty::Int])]);
        assert_eq!(some.join(&pair), None);
    }

    #[test]
    fn closures_of_the_same_shape_join() {
        let a = Ty::closure(GenericId(3), 1);
        let b = Ty::closure(GenericId(5), 1);
        let joined = a.join(&b).unwrap();
        assert_eq!(joined.to_string(), "fn #3|#5[]/1");
        assert_eq!(a.join(&Ty::closure(GenericId(5), 2)), None);
        assert_eq!(Ty::Int.join(&Ty::Str), None);
    }
}

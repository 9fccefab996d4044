//! Built-in functions visible from every file.
//!
//! Builtins are curried like any other function value. Their arguments are
//! only checked once the last one has been supplied.

use brie_common::Span;

use crate::error::TypeError;
use crate::ty::Ty;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Concat,
    ToString,
    Print,
}

pub const ALL: [Builtin; 17] = [
    Builtin::Add,
    Builtin::Sub,
    Builtin::Mul,
    Builtin::Div,
    Builtin::Rem,
    Builtin::Lt,
    Builtin::Gt,
    Builtin::Le,
    Builtin::Ge,
    Builtin::Eq,
    Builtin::Ne,
    Builtin::And,
    Builtin::Or,
    Builtin::Not,
    Builtin::Concat,
    Builtin::ToString,
    Builtin::Print,
];

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Add => "+",
            Builtin::Sub => "-",
            Builtin::Mul => "*",
            Builtin::Div => "/",
            Builtin::Rem => "%",
            Builtin::Lt => "<",
            Builtin::Gt => ">",
            Builtin::Le => "<=",
            Builtin::Ge => ">=",
            Builtin::Eq => "==",
            Builtin::Ne => "!=",
            Builtin::And => "and",
            Builtin::Or => "or",
            Builtin::Not => "not",
            Builtin::Concat => "++",
            Builtin::ToString => "to_string",
            Builtin::Print => "print",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Not | Builtin::ToString | Builtin::Print => 1,
            _ => 2,
        }
    }

    /// Check a complete application and compute its result type.
    pub fn apply(self, arguments: &[Ty], span: Span) -> Result<Ty, TypeError> {
        debug_assert_eq!(arguments.len(), self.arity());
        let expect = |expected: Ty, found: &Ty| {
            if *found == expected {
                Ok(())
            } else {
                Err(TypeError::Mismatch {
                    expected: expected.to_string(),
                    found: found.clone(),
                    span,
                })
            }
        };
        match self {
            Builtin::Add | Builtin::Sub | Builtin::Mul | Builtin::Div | Builtin::Rem => {
                for arg in arguments {
                    expect(Ty::Int, arg)?;
                }
                Ok(Ty::Int)
            }
            Builtin::Lt | Builtin::Gt | Builtin::Le | Builtin::Ge => {
                for arg in arguments {
                    expect(Ty::Int, arg)?;
                }
                Ok(Ty::Bool)
            }
            Builtin::Eq | Builtin::Ne => {
                let (left, right) = (&arguments[0], &arguments[1]);
                if !left.is_atomic() {
                    return Err(TypeError::Mismatch {
                        expected: "Int, Str, Bool or Unit".to_string(),
                        found: left.clone(),
                        span,
                    });
                }
                expect(left.clone(), right)?;
                Ok(Ty::Bool)
            }
            Builtin::And | Builtin::Or | Builtin::Not => {
                for arg in arguments {
                    expect(Ty::Bool, arg)?;
                }
                Ok(Ty::Bool)
            }
            Builtin::Concat => {
                for arg in arguments {
                    expect(Ty::Str, arg)?;
                }
                Ok(Ty::Str)
            }
            Builtin::ToString => {
                expect(Ty::Int, &arguments[0])?;
                Ok(Ty::Str)
            }
            Builtin::Print => {
                if !arguments[0].is_atomic() {
                    return Err(TypeError::Mismatch {
                        expected: "a printable value".to_string(),
                        found: arguments[0].clone(),
                        span,
                    });
                }
                Ok(Ty::Unit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for builtin in ALL {
            assert_eq!(Builtin::from_name(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::from_name("map"), None);
    }

    #[test]
    fn arithmetic_requires_integers() {
        let span = Span::new(0, 7);
        assert_eq!(Builtin::Add.apply(&[Ty::Int, Ty::Int], span), Ok(Ty::Int));
        let err = Builtin::Add.apply(&[Ty::Int, Ty::Str], span).unwrap_err();
        assert_eq!(err.to_string(), "expected Int, found Str");
    }

    #[test]
    fn equality_needs_matching_atomic_types() {
        let span = Span::default();
        assert_eq!(Builtin::Eq.apply(&[Ty::Str, Ty::Str], span), Ok(Ty::Bool));
        assert!(Builtin::Ne.apply(&[Ty::Int, Ty::Bool], span).is_err());
        let object = Ty::Object(Default::default());
        assert!(Builtin::Eq.apply(&[object.clone(), object], span).is_err());
    }
}

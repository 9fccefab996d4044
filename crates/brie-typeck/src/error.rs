//! Type error types.
//!
//! Every user-facing failure of the analysis is one [`TypeError`] carrying
//! the span of the offending node. Analysis stops at the first error.
//! Internal-consistency failures (a node analyzed twice, a closure that was
//! never registered) are not represented here: they panic.

use std::fmt;

use brie_common::Span;
use brie_parser::ParseError;

use crate::ty::Ty;

#[derive(Clone, Debug, PartialEq)]
pub enum TypeError {
    /// Two incompatible structural types were forced into one equivalence
    /// class.
    Conflict {
        left: String,
        right: String,
        span: Span,
        other: Span,
    },
    /// A resolved type is not the one an operation requires.
    Mismatch {
        expected: String,
        found: Ty,
        span: Span,
    },
    /// A function was applied to more arguments than it accepts, or a
    /// pattern names the wrong number of variant arguments.
    ArityMismatch {
        expected: usize,
        found: usize,
        span: Span,
    },
    /// A name not bound in any scope, the file's top level, or the builtins.
    UnresolvedReference { name: String, span: Span },
    /// A non-function value was applied to an argument.
    NotAFunction { ty: Ty, span: Span },
    /// A field access on an object without that field.
    NoSuchField { ty: Ty, field: String, span: Span },
    /// A special form used in the wrong shape or position.
    MalformedForm { message: String, span: Span },
    /// The entry file has no `main` block.
    MissingMain { span: Span },
    /// A closure called itself with the argument types it is currently
    /// being specialized for.
    RecursiveSpecialization { span: Span, definition: Span },
    /// `require` named a module the loader could not provide.
    ModuleNotFound { name: String, span: Span },
    /// A required module failed to parse.
    Parse(ParseError),
    /// An error raised while analyzing code from another module.
    InModule {
        module: String,
        error: Box<TypeError>,
    },
}

impl TypeError {
    pub fn malformed(message: impl Into<String>, span: Span) -> TypeError {
        TypeError::MalformedForm {
            message: message.into(),
            span,
        }
    }

    /// Primary span of the error, within the source of the module it is
    /// reported against.
    pub fn span(&self) -> Span {
        match self {
            TypeError::Conflict { span, .. }
            | TypeError::Mismatch { span, .. }
            | TypeError::ArityMismatch { span, .. }
            | TypeError::UnresolvedReference { span, .. }
            | TypeError::NotAFunction { span, .. }
            | TypeError::NoSuchField { span, .. }
            | TypeError::MalformedForm { span, .. }
            | TypeError::MissingMain { span }
            | TypeError::RecursiveSpecialization { span, .. }
            | TypeError::ModuleNotFound { span, .. } => *span,
            TypeError::Parse(err) => err.span,
            TypeError::InModule { error, .. } => error.span(),
        }
    }

    /// Attribute this error to `module` unless it already names one.
    pub fn in_module(self, module: &str) -> TypeError {
        match self {
            TypeError::InModule { .. } => self,
            error => TypeError::InModule {
                module: module.to_string(),
                error: Box::new(error),
            },
        }
    }

    /// The module the error belongs to (`None` for the entry file) and the
    /// underlying error.
    pub fn location(&self) -> (Option<&str>, &TypeError) {
        match self {
            TypeError::InModule { module, error } => (Some(module), error),
            error => (None, error),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::Conflict { left, right, .. } => {
                write!(f, "type conflict: {left} cannot unify with {right}")
            }
            TypeError::Mismatch {
                expected, found, ..
            } => write!(f, "expected {expected}, found {found}"),
            TypeError::ArityMismatch {
                expected, found, ..
            } => write!(f, "expected {expected} argument(s), found {found}"),
            TypeError::UnresolvedReference { name, .. } => {
                write!(f, "unresolved reference `{name}`")
            }
            TypeError::NotAFunction { ty, .. } => {
                write!(f, "a value of type {ty} is not a function")
            }
            TypeError::NoSuchField { ty, field, .. } => {
                write!(f, "type {ty} has no field `{field}`")
            }
            TypeError::MalformedForm { message, .. } => write!(f, "{message}"),
            TypeError::MissingMain { .. } => write!(f, "no `main` block is defined"),
            TypeError::RecursiveSpecialization { .. } => write!(
                f,
                "recursive call into a function that is still being specialized"
            ),
            TypeError::ModuleNotFound { name, .. } => write!(f, "cannot find module `{name}`"),
            TypeError::Parse(err) => write!(f, "{err}"),
            TypeError::InModule { module, error } => write!(f, "in module `{module}`: {error}"),
        }
    }
}

impl std::error::Error for TypeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_attribution_keeps_the_innermost_module() {
        let err = TypeError::UnresolvedReference {
            name: "x".to_string(),
            span: Span::new(3, 4),
        };
        let wrapped = err.in_module("util").in_module("main");
        let (module, inner) = wrapped.location();
        assert_eq!(module, Some("util"));
        assert_eq!(inner.to_string(), "unresolved reference `x`");
        assert_eq!(wrapped.span(), Span::new(3, 4));
    }
}

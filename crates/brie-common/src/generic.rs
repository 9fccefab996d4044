//! Type variables ("generics") and the allocator that issues them.
//!
//! A [`Generic`] stands for the not-yet-known type of one AST node. It is
//! created once, never mutated, and only ever referenced by the later
//! passes. The [`GenericAllocator`] belongs to a single compilation run and
//! is threaded through every pass that needs fresh variables, so two runs
//! never share counter state.

use std::fmt;

use serde::Serialize;

use crate::span::Span;

/// Index of a generic, dense from zero within one compilation run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GenericId(pub u32);

impl GenericId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GenericId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// A type variable tagged with the source span that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Generic {
    pub id: GenericId,
    pub span: Span,
}

impl fmt::Display for Generic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Issues fresh generics with a monotonically increasing counter.
#[derive(Debug, Default)]
pub struct GenericAllocator {
    next: u32,
}

impl GenericAllocator {
    /// A new allocator whose first generic is `?0`.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn fresh(&mut self, span: Span) -> Generic {
        let id = GenericId(self.next);
        self.next += 1;
        Generic { id, span }
    }

    /// Number of generics issued so far.
    pub fn issued(&self) -> u32 {
        self.next
    }

    /// Start over from `?0` for an unrelated compilation run.
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_generics_are_distinct_and_keep_their_span() {
        let mut alloc = GenericAllocator::new();
        let a = alloc.fresh(Span::new(0, 1));
        let b = alloc.fresh(Span::new(4, 7));
        assert_ne!(a.id, b.id);
        assert_eq!(b.span, Span::new(4, 7));
        assert_eq!(alloc.issued(), 2);
    }

    #[test]
    fn reset_restarts_numbering() {
        let mut alloc = GenericAllocator::new();
        alloc.fresh(Span::default());
        alloc.fresh(Span::default());
        alloc.reset();
        assert_eq!(alloc.fresh(Span::default()).id, GenericId(0));
    }

    #[test]
    fn separate_allocators_do_not_share_state() {
        let mut first = GenericAllocator::new();
        first.fresh(Span::default());
        let mut second = GenericAllocator::new();
        assert_eq!(second.fresh(Span::default()).id, GenericId(0));
        assert_eq!(format!("{}", GenericId(12)), "?12");
    }
}

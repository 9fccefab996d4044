//! Shared vocabulary for the Brie compiler crates.
//!
//! - [`span`]: byte-offset spans
//! - [`generic`]: type variables ("generics") and the per-run allocator

pub mod generic;
pub mod span;

pub use generic::{Generic, GenericAllocator, GenericId};
pub use span::Span;

//! Context Resolver for the CMP runtime.
//!
//! Turns `.ctx` YAML sources into validated [`Context`](cmp_core::Context)
//! values:
//!
//! ```text
//! candidate file ─► schema check ─► extends/include merge ─► decode ─► validate ─► cache
//! ```
//!
//! Inheritance is resolved on typed partial documents ([`ContextDocument`]);
//! keys outside the Context model fall back to the generic [`deep_merge`].

pub mod document;
pub mod merge;
pub mod resolver;
pub mod schema;

pub use document::{ContextDocument, Merge};
pub use merge::deep_merge;
pub use resolver::{ContextResolver, MAX_MERGE_DEPTH};

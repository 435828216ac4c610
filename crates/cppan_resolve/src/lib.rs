#![deny(missing_docs)]

//! Dependency resolution for cppan.
//!
//! The [`Resolver`] closes a set of user predicates to a concrete,
//! transitively complete package set, preferring the local catalog mirror
//! and falling back to the remote API when the mirror is stale, wrong or
//! incomplete. The fetch pipeline then downloads, verifies and unpacks every
//! selected package with at most one in-flight fetch per package across all
//! cooperating processes.

mod context;
mod fetch;
mod resolver;

pub use context::Context;
pub use fetch::FetchError;
pub use resolver::{resolve_dependency, ResolveError, Resolver};

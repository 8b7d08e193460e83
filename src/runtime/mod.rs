//! Runtime support for reactive primitives.
//!
//! This module provides the infrastructure for dependency tracking,
//! reactive graph management, and effect scopes.

mod context;
mod scope;

pub use context::ReactiveRuntime;
pub use scope::EffectScope;

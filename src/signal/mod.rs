//! Fine-grained reactive primitives.
//!
//! This module provides the building blocks the store layer sits on:
//! - Signals: reactive cells, with lazy watchers
//! - Memos: cached computed values

mod memo;
mod signal;

pub use memo::Memo;
pub use signal::{Signal, WatchHandle};

//! # Pantry
//!
//! Reactive store containers for Rust.
//!
//! Pantry lets independent, named pieces of application state be declared
//! once, created lazily, shared, observed and extended with plugins.
//!
//! ## Stores (High-level state management)
//!
//! - [`Registry`] - owns every store, the shared state tree and the plugins
//! - [`define_store`] - declares a store as options (state, getters, actions)
//!   or as a setup closure, returning a [`UseStore`] accessor
//! - [`Store`] - a live instance: `patch`, `subscribe`, `on_action`,
//!   `dispose`, actions via `call` / `dispatch`
//! - [`store_to_refs`] - linked per-field handles
//!
//! ## Signals (Low-level primitives)
//!
//! The reactive layer stores are built on:
//! - [`Signal<T>`] - reactive cells with lazy watchers
//! - [`Memo<T>`] - cached computed values
//! - [`runtime::EffectScope`] - disposable groups of watchers and memos
//!
//! ## Example
//!
//! ```
//! use pantry::{define_store, ActionFn, OptionsStore, Registry};
//! use serde_json::json;
//!
//! let use_counter = define_store(
//!     "counter",
//!     OptionsStore::new()
//!         .state(|| json!({ "count": 0 }))
//!         .getter("double_count", |store| {
//!             json!(store.get_as::<i64>("count").unwrap_or(0) * 2)
//!         })
//!         .action("increment", ActionFn::sync(|store, _args| {
//!             let next = store.get_as::<i64>("count")? + 1;
//!             store.set("count", json!(next))?;
//!             Ok(json!(next))
//!         })),
//! )?;
//!
//! let registry = Registry::new();
//! let counter = use_counter.use_store_in(&registry)?;
//!
//! counter.call("increment", vec![])?;
//! counter.patch(json!({ "count": 5 }))?;
//! assert_eq!(counter.get("double_count"), Some(json!(10)));
//! # Ok::<(), pantry::StoreError>(())
//! ```

pub mod error;
pub mod runtime;
pub mod signal;
pub mod store;

// Re-export main types for convenience
pub use error::{ActionFailure, Result, StoreError};
pub use signal::{Memo, Signal, WatchHandle};
pub use store::{
    active_registry, clear_active_registry, define_options_store, define_store,
    set_active_registry, store_to_refs, ActionContext, ActionFn, ActionFuture, ActionResult,
    AppHandle, FieldRef, Getter, Member, MutationInfo, OptionsStore, Plugin, PluginContext,
    Registry, SetupContext, Store, StoreDefinition, StoreRef, StoreSetup, SubscribeOptions,
    Subscription, UseStore,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_works() {
        // Basic smoke test
        let registry = Registry::new();
        let use_flags = define_store("flags", OptionsStore::new().state(|| json!({"on": false})))
            .unwrap();
        let flags = use_flags.use_store_in(&registry).unwrap();

        flags.set("on", json!(true)).unwrap();
        assert_eq!(flags.state(), json!({"on": true}));
    }
}

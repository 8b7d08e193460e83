//! Store containers.
//!
//! A [`Registry`] owns every store of an application. Stores are declared
//! once with [`define_store`], built lazily on first use, patched or mutated
//! through actions, and observed with [`Store::subscribe`] and
//! [`Store::on_action`]. Plugins registered on the registry extend every store
//! created afterwards.

mod accessor;
mod action;
mod definition;
mod field;
mod patch;
mod refs;
mod registry;
#[allow(clippy::module_inception)]
mod store;
mod subscriptions;

pub use accessor::{define_options_store, define_store, UseStore};
pub use action::{ActionContext, ActionFn, ActionFuture, ActionResult};
pub use definition::{Member, OptionsStore, SetupContext, StoreDefinition, StoreSetup};
pub use field::{FieldRef, Getter};
pub use patch::{assign_state, merge_state};
pub use refs::{store_to_refs, StoreRef};
pub use registry::{
    active_registry, clear_active_registry, set_active_registry, AppHandle, Plugin,
    PluginContext, Registry,
};
pub use store::{MutationInfo, Store, SubscribeOptions};
pub use subscriptions::{SubscriberList, Subscription};

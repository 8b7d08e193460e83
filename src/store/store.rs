use super::action::{ActionContext, ActionFuture, WrappedAction};
use super::definition::{normalize, Member, SetupContext, StoreDefinition, StoreKind};
use super::field::{FieldRef, Getter};
use super::patch::{assign_state, merge_state};
use super::registry::{PluginContext, Registry, RegistryInner};
use super::subscriptions::{SubscriberList, Subscription};
use crate::error::{kind_of, Result, StoreError};
use crate::runtime::EffectScope;
use crate::signal::Signal;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, Weak};

/// A member as installed on a built store.
#[derive(Clone)]
pub(crate) enum Slot {
    Field(FieldRef),
    Getter(Getter),
    Action(WrappedAction),
    Raw(Value),
}

pub(crate) struct StoreInner {
    id: String,
    registry: Weak<RegistryInner>,
    state: Signal<Value>,
    scope: EffectScope,
    members: RwLock<IndexMap<String, Slot>>,
    action_subscribers: SubscriberList<ActionContext>,
    options: Option<super::definition::OptionsStore>,
    disposed: AtomicBool,
}

/// Passed to [`Store::subscribe`] callbacks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MutationInfo {
    pub store_id: String,
}

/// Options for [`Store::subscribe`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SubscribeOptions {
    /// Keep the subscription alive after the store is disposed; it then stops
    /// only with the registry's root scope.
    pub detached: bool,
}

/// A live store instance.
///
/// Cloning is cheap and every clone is the same instance; compare instances
/// with [`Store::ptr_eq`] (or `==`).
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Undoes a half-built store unless disarmed, on error and on unwind alike.
struct BuildGuard<'a> {
    registry: &'a Registry,
    id: &'a str,
    scope: EffectScope,
    hydrated: bool,
    armed: bool,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.scope.stop();
        if !self.hydrated {
            self.registry.discard_state_entry(self.id);
        }
        tracing::debug!(store = self.id, "store creation aborted");
    }
}

/// Build a store from its definition and register it in `registry`.
pub(crate) fn create_store(
    registry: &Registry,
    id: &str,
    definition: &StoreDefinition,
) -> Result<Store> {
    let normalized = normalize(definition);
    let scope = registry.scope().child();
    let (state, hydrated) = registry.state_entry(id);
    let mut guard = BuildGuard {
        registry,
        id,
        scope: scope.clone(),
        hydrated,
        armed: true,
    };

    let options = match normalized.kind {
        StoreKind::Options(options) => Some(options),
        StoreKind::Setup => None,
    };
    let store = Store {
        inner: Arc::new(StoreInner {
            id: id.to_string(),
            registry: registry.downgrade(),
            state: state.clone(),
            scope: scope.clone(),
            members: RwLock::new(IndexMap::new()),
            action_subscribers: SubscriberList::new(),
            options,
            disposed: AtomicBool::new(false),
        }),
    };

    let cx = SetupContext::new(
        id,
        Arc::downgrade(&store.inner),
        state.clone(),
        hydrated,
        registry.clone(),
    );
    let raw = scope
        .run(|| (normalized.setup)(&cx))
        .ok_or_else(|| StoreError::ScopeStopped { id: id.to_string() })??;

    let mut slots = IndexMap::new();
    for (name, member) in raw.into_members() {
        let slot = match member {
            Member::Field(field) => {
                field.attach(&state, &name, true);
                Slot::Field(field)
            }
            Member::Getter(getter) => Slot::Getter(getter),
            Member::Action(body) => Slot::Action(WrappedAction::new(name.clone(), body)),
            Member::Raw(value) => Slot::Raw(value),
        };
        slots.insert(name, slot);
    }
    *store
        .inner
        .members
        .write()
        .unwrap_or_else(PoisonError::into_inner) = slots;

    let plugins = registry.plugins();
    for plugin in &plugins {
        let context = PluginContext {
            store: &store,
            registry,
            app: registry.app(),
        };
        let extension = scope.run(|| plugin(&context)).flatten();
        if let Some(extension) = extension {
            let mut members = store
                .inner
                .members
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for (key, value) in extension {
                members.insert(key, Slot::Raw(value));
            }
        }
    }

    guard.armed = false;
    tracing::debug!(
        store = id,
        setup = definition.is_setup(),
        hydrated,
        plugins = plugins.len(),
        "store created"
    );
    Ok(registry.register(store))
}

impl Store {
    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    fn members(&self) -> RwLockReadGuard<'_, IndexMap<String, Slot>> {
        self.inner
            .members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, name: &str) -> Option<Slot> {
        self.members().get(name).cloned()
    }

    pub(crate) fn action_subscribers(&self) -> &SubscriberList<ActionContext> {
        &self.inner.action_subscribers
    }

    pub(crate) fn reactive_members(&self) -> Vec<(String, Slot)> {
        self.members()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Field(_) | Slot::Getter(_)))
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect()
    }

    /// The store id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The registry this store was created in, while it is alive.
    pub fn registry(&self) -> Option<Registry> {
        self.inner.registry.upgrade().map(Registry::from_inner)
    }

    /// Current state (tracked).
    pub fn state(&self) -> Value {
        self.inner.state.get()
    }

    /// Current state, deserialized.
    pub fn state_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.state())?)
    }

    /// Replace every top-level key the given object provides.
    pub fn set_state(&self, state: Value) -> Result<()> {
        let Value::Object(incoming) = state else {
            return Err(StoreError::InvalidPatch {
                id: self.inner.id.clone(),
                found: kind_of(&state),
            });
        };
        self.commit(|current| assign_state(current, &incoming));
        Ok(())
    }

    /// Deep-merge a partial state object into the current state.
    pub fn patch(&self, partial: Value) -> Result<()> {
        let Value::Object(incoming) = partial else {
            return Err(StoreError::InvalidPatch {
                id: self.inner.id.clone(),
                found: kind_of(&partial),
            });
        };
        tracing::trace!(store = %self.inner.id, keys = incoming.len(), "patch");
        self.commit(|current| merge_state(current, &incoming));
        Ok(())
    }

    /// Mutate the current state with a function.
    pub fn patch_with<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        tracing::trace!(store = %self.inner.id, "patch with function");
        self.commit(mutate);
    }

    /// Apply `mutate` to a copy of the state and commit it if anything changed.
    fn commit<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut next = match self.inner.state.get_untracked() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        mutate(&mut next);
        self.inner.state.set_if_changed(Value::Object(next))
    }

    /// Restore the declared initial state of an options store.
    pub fn reset(&self) -> Result<()> {
        let Some(options) = &self.inner.options else {
            return Err(StoreError::ResetUnsupported {
                id: self.inner.id.clone(),
            });
        };
        let initial = options.initial_state(&self.inner.id)?;
        self.commit(|current| assign_state(current, &initial));
        Ok(())
    }

    /// Observe committed state changes.
    pub fn subscribe<F>(&self, callback: F, options: SubscribeOptions) -> Subscription
    where
        F: Fn(&MutationInfo, &Value) + Send + Sync + 'static,
    {
        let scope = if options.detached {
            match self.registry() {
                Some(registry) => registry.scope().clone(),
                None => EffectScope::with_runtime(self.inner.scope.runtime()),
            }
        } else {
            self.inner.scope.clone()
        };

        let info = MutationInfo {
            store_id: self.inner.id.clone(),
        };
        let state = self.inner.state.clone();
        let watcher = scope.run(|| state.watch(move |current| callback(&info, current)));

        match watcher {
            Some(watcher) => Subscription::new(move || watcher.stop()),
            None => {
                tracing::warn!(store = %self.inner.id, "subscribe on a stopped store; ignoring");
                Subscription::inert()
            }
        }
    }

    /// Observe every action call on this store.
    pub fn on_action<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ActionContext) + Send + Sync + 'static,
    {
        self.inner.action_subscribers.subscribe(callback)
    }

    /// Stop the store's scope, drop its action subscribers and unregister it.
    ///
    /// Its state stays in the registry, so a later access resumes from it.
    pub fn dispose(&self) {
        let first = !self.inner.disposed.swap(true, Ordering::SeqCst);
        self.inner.scope.stop();
        self.inner.action_subscribers.clear();
        if let Some(registry) = self.registry() {
            registry.unregister(self);
        }
        if first {
            tracing::debug!(store = %self.inner.id, "store disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Read a member (field, getter or plain value) or a state key by name.
    pub fn get(&self, name: &str) -> Option<Value> {
        match self.slot(name) {
            Some(Slot::Field(field)) => Some(field.get()),
            Some(Slot::Getter(getter)) => Some(getter.get()),
            Some(Slot::Raw(value)) => Some(value),
            Some(Slot::Action(_)) => None,
            None => self.inner.state.with(|state| state.get(name).cloned()),
        }
    }

    /// Read a member by name and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.get(name).ok_or_else(|| StoreError::UnknownField {
            store: self.inner.id.clone(),
            field: name.to_string(),
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Write a state field.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        match self.slot(name) {
            Some(Slot::Field(field)) => {
                field.set(value);
                Ok(())
            }
            None if self.inner.state.with_untracked(|s| s.get(name).is_some()) => {
                self.commit(|state| {
                    state.insert(name.to_string(), value);
                });
                Ok(())
            }
            _ => Err(StoreError::UnknownField {
                store: self.inner.id.clone(),
                field: name.to_string(),
            }),
        }
    }

    /// A linked handle to a state field.
    pub fn field(&self, name: &str) -> Option<FieldRef> {
        match self.slot(name) {
            Some(Slot::Field(field)) => Some(field),
            None if self.inner.state.with_untracked(|s| s.get(name).is_some()) => {
                Some(FieldRef::attached(self.inner.state.clone(), name))
            }
            _ => None,
        }
    }

    pub fn getter(&self, name: &str) -> Option<Getter> {
        match self.slot(name) {
            Some(Slot::Getter(getter)) => Some(getter),
            _ => None,
        }
    }

    pub fn has_action(&self, name: &str) -> bool {
        matches!(self.slot(name), Some(Slot::Action(_)))
    }

    /// Whether the named action was declared async.
    pub fn is_async_action(&self, name: &str) -> bool {
        matches!(self.slot(name), Some(Slot::Action(action)) if action.is_async())
    }

    /// Names of every member, in declaration order (plugin members last).
    pub fn member_names(&self) -> Vec<String> {
        self.members().keys().cloned().collect()
    }

    fn action(&self, name: &str) -> Result<WrappedAction> {
        match self.slot(name) {
            Some(Slot::Action(action)) => Ok(action),
            _ => Err(StoreError::UnknownAction {
                store: self.inner.id.clone(),
                action: name.to_string(),
            }),
        }
    }

    /// Call a sync action.
    ///
    /// Action subscribers run first; a failure reaches their `on_error`
    /// callbacks and is then returned as [`StoreError::ActionFailed`].
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.action(name)?.call(self, args)
    }

    /// Call any action and get its result as a future.
    ///
    /// Action subscribers are notified before this returns. Sync actions have
    /// already finished too; async bodies run when the future is polled, so
    /// dropping it unpolled skips the body and its after/error callbacks.
    pub fn dispatch(&self, name: &str, args: Vec<Value>) -> ActionFuture<Result<Value>> {
        match self.action(name) {
            Ok(action) => action.dispatch(self, args),
            Err(err) => Box::pin(std::future::ready(Err(err))),
        }
    }

    /// Whether both handles are the same instance.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Store {}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

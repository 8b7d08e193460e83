use super::definition::StoreDefinition;
use super::store::{create_store, Store};
use crate::error::{kind_of, Result, StoreError};
use crate::runtime::{EffectScope, ReactiveRuntime};
use crate::signal::Signal;
use serde_json::{Map, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

/// Opaque handle to the host application, handed to plugins.
pub type AppHandle = Arc<dyn Any + Send + Sync>;

/// A store plugin: runs once for every store created after it was registered.
///
/// Returned entries are merged onto the store as plain members.
pub type Plugin = Arc<dyn Fn(&PluginContext<'_>) -> Option<Map<String, Value>> + Send + Sync>;

/// What a plugin sees when a store is created.
pub struct PluginContext<'a> {
    pub store: &'a Store,
    pub registry: &'a Registry,
    pub app: Option<AppHandle>,
}

pub(crate) struct RegistryInner {
    scope: EffectScope,
    state: Signal<BTreeMap<String, Signal<Value>>>,
    stores: RwLock<HashMap<String, Store>>,
    plugins: RwLock<Vec<Plugin>>,
    app: RwLock<Option<AppHandle>>,
}

/// The root of a store application: every store, its state, and the plugins.
///
/// Clones share the same registry.
///
/// # Examples
///
/// ```
/// use pantry::{define_store, OptionsStore, Registry};
/// use serde_json::json;
///
/// let registry = Registry::new();
/// registry.use_plugin(|_ctx| Some(json!({ "version": 1 }).as_object().cloned().unwrap_or_default()));
///
/// let use_settings = define_store("settings", OptionsStore::new().state(|| json!({ "theme": "dark" })))?;
/// let settings = use_settings.use_store_in(&registry)?;
///
/// assert_eq!(settings.get("version"), Some(json!(1)));
/// assert_eq!(registry.state(), json!({ "settings": { "theme": "dark" } }));
/// # Ok::<(), pantry::StoreError>(())
/// ```
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

thread_local! {
    static PROVIDED: RefCell<Vec<Registry>> = const { RefCell::new(Vec::new()) };
}

static ACTIVE: Mutex<Option<Registry>> = Mutex::new(None);

/// Make `registry` the process-wide fallback used by [`UseStore::use_store`](crate::UseStore::use_store).
pub fn set_active_registry(registry: &Registry) {
    *ACTIVE.lock().unwrap_or_else(PoisonError::into_inner) = Some(registry.clone());
}

/// Forget the process-wide fallback registry.
pub fn clear_active_registry() {
    *ACTIVE.lock().unwrap_or_else(PoisonError::into_inner) = None;
}

/// The registry stores resolve against right now.
///
/// The innermost [`Registry::provide`] on this thread wins; otherwise the
/// last registry passed to [`set_active_registry`] (or installed).
pub fn active_registry() -> Option<Registry> {
    PROVIDED
        .with(|stack| stack.borrow().last().cloned())
        .or_else(|| ACTIVE.lock().unwrap_or_else(PoisonError::into_inner).clone())
}

impl Registry {
    /// A fresh registry on the current reactive runtime.
    pub fn new() -> Self {
        let runtime = ReactiveRuntime::current();
        let state = ReactiveRuntime::with_runtime(Arc::clone(&runtime), || Signal::new(BTreeMap::new()));

        Self {
            inner: Arc::new(RegistryInner {
                scope: EffectScope::with_runtime(runtime),
                state,
                stores: RwLock::new(HashMap::new()),
                plugins: RwLock::new(Vec::new()),
                app: RwLock::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Arc::downgrade(&self.inner)
    }

    /// Attach the registry to a host application and make it the active one.
    pub fn install<A>(&self, app: A)
    where
        A: Any + Send + Sync,
    {
        *self.inner.app.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(app));
        set_active_registry(self);
        tracing::debug!("registry installed");
    }

    /// The installed host application, if any.
    pub fn app(&self) -> Option<AppHandle> {
        self.inner
            .app
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a plugin for stores created from now on.
    pub fn use_plugin<F>(&self, plugin: F) -> &Self
    where
        F: Fn(&PluginContext<'_>) -> Option<Map<String, Value>> + Send + Sync + 'static,
    {
        self.inner
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(plugin));
        self
    }

    pub(crate) fn plugins(&self) -> Vec<Plugin> {
        self.inner
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `f` with this registry as the ambient one on the current thread.
    pub fn provide<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        PROVIDED.with(|stack| stack.borrow_mut().push(self.clone()));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        PROVIDED.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// The store registered under `id`, built from `definition` on first access.
    pub fn get_or_create_store(&self, id: &str, definition: &StoreDefinition) -> Result<Store> {
        if let Some(store) = self.store(id) {
            return Ok(store);
        }
        create_store(self, id, definition)
    }

    pub fn store(&self, id: &str) -> Option<Store> {
        self.inner
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn has_store(&self, id: &str) -> bool {
        self.inner
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Ids of the live stores, sorted.
    pub fn store_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Add a freshly built store; an instance that won a race is kept instead.
    pub(crate) fn register(&self, store: Store) -> Store {
        let mut stores = self
            .inner
            .stores
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = stores.get(store.id()) {
            tracing::warn!(store = store.id(), "store was created twice; keeping the first");
            return existing.clone();
        }
        stores.insert(store.id().to_string(), store.clone());
        store
    }

    /// Remove `store` if it is still the registered instance for its id.
    pub(crate) fn unregister(&self, store: &Store) {
        let mut stores = self
            .inner
            .stores
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if stores.get(store.id()).is_some_and(|current| current.ptr_eq(store)) {
            stores.remove(store.id());
        }
    }

    /// The state cell for `id`, created empty when missing.
    ///
    /// The flag reports whether state for `id` already existed.
    pub(crate) fn state_entry(&self, id: &str) -> (Signal<Value>, bool) {
        if let Some(cell) = self.inner.state.with_untracked(|tree| tree.get(id).cloned()) {
            return (cell, true);
        }
        let cell = self.new_cell(Value::Object(Map::new()));
        let inserted = cell.clone();
        self.inner.state.update(|tree| {
            tree.insert(id.to_string(), inserted);
        });
        (cell, false)
    }

    pub(crate) fn discard_state_entry(&self, id: &str) {
        self.inner.state.update(|tree| {
            tree.remove(id);
        });
    }

    fn new_cell(&self, value: Value) -> Signal<Value> {
        ReactiveRuntime::with_runtime(self.inner.scope.runtime(), || Signal::new(value))
    }

    /// Seed or overwrite the state of `id`, e.g. from persisted data.
    ///
    /// A store created later for `id` starts from this state.
    pub fn hydrate(&self, id: &str, state: Value) -> Result<()> {
        if !state.is_object() {
            return Err(StoreError::InvalidState {
                id: id.to_string(),
                found: kind_of(&state),
            });
        }
        tracing::debug!(store = id, "hydrating state");
        match self.inner.state.with_untracked(|tree| tree.get(id).cloned()) {
            Some(cell) => {
                cell.set_if_changed(state);
            }
            None => {
                let cell = self.new_cell(state);
                self.inner.state.update(|tree| {
                    tree.insert(id.to_string(), cell);
                });
            }
        }
        Ok(())
    }

    /// Plain snapshot of every store's state, keyed by store id.
    pub fn state(&self) -> Value {
        let cells = self.inner.state.get();
        let snapshot: Map<String, Value> = cells
            .into_iter()
            .map(|(id, cell)| (id, cell.get()))
            .collect();
        Value::Object(snapshot)
    }

    /// The root effect scope; stopping it stops every store's subscriptions.
    pub fn scope(&self) -> &EffectScope {
        &self.inner.scope
    }

    /// Whether both handles are the same registry.
    pub fn ptr_eq(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("stores", &self.store_ids())
            .field("plugins", &self.plugins().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::definition::OptionsStore;
    use serde_json::json;

    fn counter() -> StoreDefinition {
        OptionsStore::new().state(|| json!({"count": 0})).into()
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = Registry::new();
        let first = registry.get_or_create_store("counter", &counter()).unwrap();
        let second = registry.get_or_create_store("counter", &counter()).unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(registry.store_ids(), vec!["counter".to_string()]);
    }

    #[test]
    fn provide_nests_and_restores() {
        let outer = Registry::new();
        let inner = Registry::new();

        outer.provide(|| {
            assert!(active_registry().is_some_and(|r| r.ptr_eq(&outer)));
            inner.provide(|| {
                assert!(active_registry().is_some_and(|r| r.ptr_eq(&inner)));
            });
            assert!(active_registry().is_some_and(|r| r.ptr_eq(&outer)));
        });
    }

    #[test]
    fn hydrated_state_wins_over_declared_state() {
        let registry = Registry::new();
        registry.hydrate("counter", json!({"count": 41})).unwrap();

        let store = registry.get_or_create_store("counter", &counter()).unwrap();
        assert_eq!(store.state(), json!({"count": 41}));
    }

    #[test]
    fn hydrate_rejects_non_objects() {
        let registry = Registry::new();
        assert!(matches!(
            registry.hydrate("counter", json!(3)),
            Err(StoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn state_survives_dispose_and_is_resumed() {
        let registry = Registry::new();
        let store = registry.get_or_create_store("counter", &counter()).unwrap();
        store.patch(json!({"count": 3})).unwrap();
        store.dispose();

        assert!(!registry.has_store("counter"));
        assert_eq!(registry.state(), json!({"counter": {"count": 3}}));

        let again = registry.get_or_create_store("counter", &counter()).unwrap();
        assert!(!again.ptr_eq(&store));
        assert_eq!(again.get("count"), Some(json!(3)));
    }

    #[test]
    fn failed_creation_leaves_no_trace() {
        let registry = Registry::new();
        let broken: StoreDefinition = OptionsStore::new().state(|| json!("not an object")).into();

        let err = registry.get_or_create_store("broken", &broken).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { found: "a string", .. }));
        assert!(!registry.has_store("broken"));
        assert_eq!(registry.state(), json!({}));
    }
}

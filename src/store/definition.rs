use super::action::ActionFn;
use super::field::{FieldRef, Getter};
use super::registry::Registry;
use super::store::{Store, StoreInner};
use crate::error::{kind_of, Result, StoreError};
use crate::signal::Signal;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};

type StateFn = Arc<dyn Fn() -> Value + Send + Sync>;
type GetterFn = Arc<dyn Fn(&Store) -> Value + Send + Sync>;
type SetupFn = Arc<dyn Fn(&SetupContext) -> StoreSetup + Send + Sync>;

/// A store declared as initial state, getters and actions.
///
/// ```
/// use pantry::{ActionFn, OptionsStore};
/// use serde_json::json;
///
/// let counter = OptionsStore::new()
///     .state(|| json!({ "count": 0 }))
///     .getter("double_count", |store| json!(store.get_as::<i64>("count").unwrap_or(0) * 2))
///     .action("increment", ActionFn::sync(|store, _args| {
///         let next = store.get_as::<i64>("count")? + 1;
///         store.set("count", json!(next))?;
///         Ok(json!(next))
///     }));
/// # let _ = counter;
/// ```
#[derive(Clone, Default)]
pub struct OptionsStore {
    id: Option<String>,
    state: Option<StateFn>,
    getters: IndexMap<String, GetterFn>,
    actions: IndexMap<String, ActionFn>,
}

impl OptionsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying their own store id, for [`define_options_store`](crate::define_options_store).
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Initial state factory. Must produce a JSON object.
    pub fn state<F>(mut self, state: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.state = Some(Arc::new(state));
        self
    }

    /// A derived value computed from the store.
    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Store) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn action(mut self, name: impl Into<String>, action: ActionFn) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Evaluate the state factory; no factory means an empty state.
    pub(crate) fn initial_state(&self, id: &str) -> Result<Map<String, Value>> {
        let Some(state) = &self.state else {
            return Ok(Map::new());
        };
        match state() {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::InvalidState {
                id: id.to_string(),
                found: kind_of(&other),
            }),
        }
    }
}

impl fmt::Debug for OptionsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsStore")
            .field("id", &self.id)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Either declaration style accepted by [`define_store`](crate::define_store).
#[derive(Clone)]
pub enum StoreDefinition {
    Options(OptionsStore),
    Setup(SetupFn),
}

impl StoreDefinition {
    /// A store whose members are produced by a setup closure.
    pub fn setup<F>(setup: F) -> Self
    where
        F: Fn(&SetupContext) -> StoreSetup + Send + Sync + 'static,
    {
        StoreDefinition::Setup(Arc::new(setup))
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, StoreDefinition::Setup(_))
    }
}

impl From<OptionsStore> for StoreDefinition {
    fn from(options: OptionsStore) -> Self {
        StoreDefinition::Options(options)
    }
}

impl fmt::Debug for StoreDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreDefinition::Options(options) => options.fmt(f),
            StoreDefinition::Setup(_) => f.write_str("StoreDefinition::Setup"),
        }
    }
}

/// One named entry of a store's surface.
#[derive(Clone, Debug)]
pub enum Member {
    /// Reactive state field; lives in the registry state tree.
    Field(FieldRef),
    /// Derived value; never stored in the state tree.
    Getter(Getter),
    /// Action body, wrapped when the store is built.
    Action(ActionFn),
    /// Plain value passed through untouched and never made reactive.
    Raw(Value),
}

/// The flat mapping a setup closure returns.
#[derive(Clone, Debug, Default)]
pub struct StoreSetup {
    members: IndexMap<String, Member>,
}

impl StoreSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, field: FieldRef) -> Self {
        self.members.insert(name.into(), Member::Field(field));
        self
    }

    pub fn getter(mut self, name: impl Into<String>, getter: Getter) -> Self {
        self.members.insert(name.into(), Member::Getter(getter));
        self
    }

    pub fn action(mut self, name: impl Into<String>, action: ActionFn) -> Self {
        self.members.insert(name.into(), Member::Action(action));
        self
    }

    pub fn raw(mut self, name: impl Into<String>, value: Value) -> Self {
        self.members.insert(name.into(), Member::Raw(value));
        self
    }

    pub fn member(mut self, name: impl Into<String>, member: Member) -> Self {
        self.members.insert(name.into(), member);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn into_members(self) -> IndexMap<String, Member> {
        self.members
    }
}

/// Handed to setup closures while a store is being built.
pub struct SetupContext {
    id: String,
    store: Weak<StoreInner>,
    state: Signal<Value>,
    hydrated: bool,
    registry: Registry,
}

impl SetupContext {
    pub(crate) fn new(
        id: &str,
        store: Weak<StoreInner>,
        state: Signal<Value>,
        hydrated: bool,
        registry: Registry,
    ) -> Self {
        Self {
            id: id.to_string(),
            store,
            state,
            hydrated,
            registry,
        }
    }

    /// Id of the store being built.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The registry the store is being built in, for using other stores.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Whether state for this id already existed before the store was built.
    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// A new reactive field. It joins the store state when returned from setup.
    pub fn field(&self, initial: Value) -> FieldRef {
        FieldRef::detached(initial)
    }

    /// A derived value owned by the store's scope.
    pub fn computed<F>(&self, compute: F) -> Getter
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Getter::new(compute)
    }

    /// A getter evaluated against the finished store.
    ///
    /// Reads `Null` once the store has been dropped.
    pub fn store_getter<F>(&self, getter: F) -> Getter
    where
        F: Fn(&Store) -> Value + Send + Sync + 'static,
    {
        let store = self.store.clone();
        Getter::new(move || match store.upgrade() {
            Some(inner) => getter(&Store::from_inner(inner)),
            None => Value::Null,
        })
    }

    fn seed(&self, initial: Map<String, Value>) {
        self.state.set_if_changed(Value::Object(initial));
    }

    fn fill_missing(&self, defaults: Map<String, Value>) {
        let mut next = self.state.get_untracked();
        if let Value::Object(map) = &mut next {
            for (key, value) in defaults {
                map.entry(key).or_insert(value);
            }
        }
        self.state.set_if_changed(next);
    }

    fn state_keys(&self) -> Vec<String> {
        self.state.with_untracked(|state| match state {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        })
    }

    fn state_field(&self, key: &str) -> FieldRef {
        FieldRef::attached(self.state.clone(), key)
    }
}

pub(crate) enum StoreKind {
    Options(OptionsStore),
    Setup,
}

type NormalizedSetup = Box<dyn Fn(&SetupContext) -> Result<StoreSetup> + Send + Sync>;

/// Both declaration styles reduced to one setup closure.
pub(crate) struct NormalizedStore {
    pub(crate) kind: StoreKind,
    pub(crate) setup: NormalizedSetup,
}

pub(crate) fn normalize(definition: &StoreDefinition) -> NormalizedStore {
    match definition {
        StoreDefinition::Setup(setup) => {
            let setup = Arc::clone(setup);
            NormalizedStore {
                kind: StoreKind::Setup,
                setup: Box::new(move |cx| Ok(setup(cx))),
            }
        }
        StoreDefinition::Options(options) => {
            let kind = StoreKind::Options(options.clone());
            let options = options.clone();
            NormalizedStore {
                kind,
                setup: Box::new(move |cx| options_setup(&options, cx)),
            }
        }
    }
}

fn options_setup(options: &OptionsStore, cx: &SetupContext) -> Result<StoreSetup> {
    let initial = options.initial_state(cx.id())?;
    if cx.is_hydrated() {
        cx.fill_missing(initial);
    } else {
        cx.seed(initial);
    }

    let mut setup = StoreSetup::new();
    for key in cx.state_keys() {
        let field = cx.state_field(&key);
        setup = setup.field(key, field);
    }
    for (name, action) in &options.actions {
        setup = setup.action(name.clone(), action.clone());
    }
    for (name, getter) in &options.getters {
        let getter = Arc::clone(getter);
        setup = setup.getter(name.clone(), cx.store_getter(move |store| getter(store)));
    }
    Ok(setup)
}

use crate::error::Result;
use crate::signal::{Memo, Signal};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Clone)]
enum Binding {
    /// Created by a setup closure and not (yet) exported into a store's state.
    Detached(Signal<Value>),
    /// Reads and writes one key of a store's state cell.
    Attached { state: Signal<Value>, key: String },
}

/// A reactive state field handle.
///
/// Reads are tracked, so a getter or memo reading a field recomputes when it
/// changes. Once the field belongs to a store, every clone reads and writes
/// through to that store's state.
#[derive(Clone)]
pub struct FieldRef {
    binding: Arc<RwLock<Binding>>,
}

impl FieldRef {
    pub(crate) fn detached(initial: Value) -> Self {
        Self {
            binding: Arc::new(RwLock::new(Binding::Detached(Signal::new(initial)))),
        }
    }

    pub(crate) fn attached(state: Signal<Value>, key: impl Into<String>) -> Self {
        Self {
            binding: Arc::new(RwLock::new(Binding::Attached {
                state,
                key: key.into(),
            })),
        }
    }

    fn binding(&self) -> Binding {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current value; `Null` when the key is absent from the state.
    pub fn get(&self) -> Value {
        match self.binding() {
            Binding::Detached(signal) => signal.get(),
            Binding::Attached { state, key } => {
                state.with(|value| value.get(&key).cloned().unwrap_or(Value::Null))
            }
        }
    }

    /// Current value, deserialized.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.get())?)
    }

    /// Write a new value through to the owning state.
    pub fn set(&self, value: Value) {
        match self.binding() {
            Binding::Detached(signal) => signal.set(value),
            Binding::Attached { state, key } => {
                let mut next = state.get_untracked();
                if let Value::Object(map) = &mut next {
                    map.insert(key, value);
                }
                state.set_if_changed(next);
            }
        }
    }

    /// Modify the value in place.
    pub fn update(&self, f: impl FnOnce(&mut Value)) {
        let mut value = match self.binding() {
            Binding::Detached(signal) => signal.get_untracked(),
            Binding::Attached { state, key } => state
                .with_untracked(|v| v.get(&key).cloned())
                .unwrap_or(Value::Null),
        };
        f(&mut value);
        self.set(value);
    }

    /// The state key this field is bound to, once attached to a store.
    pub fn key(&self) -> Option<String> {
        match self.binding() {
            Binding::Detached(_) => None,
            Binding::Attached { key, .. } => Some(key),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.key().is_some()
    }

    /// Move a detached field into `state[key]`.
    ///
    /// With `keep_existing`, a value already present at `key` wins over the
    /// field's own value. Fields that are already attached stay where they are.
    pub(crate) fn attach(&self, state: &Signal<Value>, key: &str, keep_existing: bool) {
        let mut binding = self.binding.write().unwrap_or_else(PoisonError::into_inner);
        let Binding::Detached(own) = &*binding else {
            return;
        };
        let own = own.clone();

        let mut next = state.get_untracked();
        if let Value::Object(map) = &mut next {
            if !(keep_existing && map.contains_key(key)) {
                map.insert(key.to_string(), own.get_untracked());
            }
        }
        *binding = Binding::Attached {
            state: state.clone(),
            key: key.to_string(),
        };
        drop(binding);

        state.set_if_changed(next);
        // Anything that read the detached cell recomputes against the store state.
        own.notify();
    }

    /// Whether both handles share one binding.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.binding, &other.binding)
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRef")
            .field("key", &self.key())
            .field("value", &self.get())
            .finish()
    }
}

/// A derived store value: computed lazily, cached until a field it read changes.
#[derive(Clone)]
pub struct Getter {
    memo: Memo<Value>,
}

impl Getter {
    pub(crate) fn new<F>(compute: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            memo: Memo::new(compute),
        }
    }

    pub fn get(&self) -> Value {
        self.memo.get()
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.get())?)
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getter").field("id", &self.memo.id()).finish()
    }
}

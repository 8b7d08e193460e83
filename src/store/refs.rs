use super::field::{FieldRef, Getter};
use super::store::{Slot, Store};
use indexmap::IndexMap;
use serde_json::Value;

/// A linked handle to one reactive member of a store.
#[derive(Clone, Debug)]
pub enum StoreRef {
    /// Read/write, through to the store state.
    Field(FieldRef),
    /// Read-only derived value.
    Getter(Getter),
}

impl StoreRef {
    pub fn get(&self) -> Value {
        match self {
            StoreRef::Field(field) => field.get(),
            StoreRef::Getter(getter) => getter.get(),
        }
    }

    pub fn as_field(&self) -> Option<&FieldRef> {
        match self {
            StoreRef::Field(field) => Some(field),
            StoreRef::Getter(_) => None,
        }
    }
}

/// Linked handles for every state field and getter of `store`.
///
/// Actions and plain members are left out. The handles stay connected to the
/// live store: writes through a field handle show up in the store state.
pub fn store_to_refs(store: &Store) -> IndexMap<String, StoreRef> {
    store
        .reactive_members()
        .into_iter()
        .filter_map(|(name, slot)| match slot {
            Slot::Field(field) => Some((name, StoreRef::Field(field))),
            Slot::Getter(getter) => Some((name, StoreRef::Getter(getter))),
            Slot::Action(_) | Slot::Raw(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::action::ActionFn;
    use crate::store::definition::OptionsStore;
    use crate::store::registry::Registry;
    use serde_json::json;

    #[test]
    fn refs_cover_fields_and_getters_only() {
        let registry = Registry::new();
        registry.use_plugin(|_| Some(json!({"plugin": true}).as_object().cloned().unwrap_or_default()));
        let options = OptionsStore::new()
            .state(|| json!({"count": 1}))
            .getter("double", |store| json!(store.get_as::<i64>("count").unwrap_or(0) * 2))
            .action("noop", ActionFn::sync(|_, _| Ok(Value::Null)));
        let store = registry.get_or_create_store("counter", &options.into()).unwrap();

        let refs = store_to_refs(&store);
        assert_eq!(refs.keys().collect::<Vec<_>>(), vec!["count", "double"]);

        let count = refs["count"].as_field().unwrap();
        count.set(json!(21));
        assert_eq!(store.get("count"), Some(json!(21)));
        assert_eq!(refs["double"].get(), json!(42));

        store.patch(json!({"count": 2})).unwrap();
        assert_eq!(refs["count"].get(), json!(2));
        assert!(refs["double"].as_field().is_none());
    }
}

use super::definition::{OptionsStore, StoreDefinition};
use super::registry::{active_registry, Registry};
use super::store::Store;
use crate::error::{Result, StoreError};
use std::fmt;
use std::sync::Arc;

/// Returned by [`define_store`]: resolves the singleton store for one id.
#[derive(Clone)]
pub struct UseStore {
    id: Arc<str>,
    definition: Arc<StoreDefinition>,
}

/// Declare a store under `id`.
///
/// Nothing is built until the first [`UseStore::use_store`] call. Fails when
/// `id` is empty or contradicts an id carried by the options.
///
/// ```
/// use pantry::{define_store, Registry, SetupContext, StoreDefinition, StoreSetup};
/// use serde_json::json;
///
/// let use_todos = define_store(
///     "todos",
///     StoreDefinition::setup(|cx: &SetupContext| {
///         let items = cx.field(json!([]));
///         let count = cx.computed({
///             let items = items.clone();
///             move || json!(items.get().as_array().map_or(0, Vec::len))
///         });
///         StoreSetup::new().field("items", items).getter("count", count)
///     }),
/// )?;
///
/// let registry = Registry::new();
/// let todos = registry.provide(|| use_todos.use_store())?;
/// todos.patch(json!({ "items": ["write docs"] }))?;
/// assert_eq!(todos.get("count"), Some(json!(1)));
/// # Ok::<(), pantry::StoreError>(())
/// ```
pub fn define_store(
    id: impl Into<String>,
    definition: impl Into<StoreDefinition>,
) -> Result<UseStore> {
    let id = id.into();
    let definition = definition.into();

    if id.is_empty() {
        return Err(StoreError::MissingId);
    }
    if let StoreDefinition::Options(options) = &definition {
        if let Some(declared) = options.id() {
            if declared != id {
                return Err(StoreError::ConflictingId {
                    declared: declared.to_string(),
                    given: id,
                });
            }
        }
    }

    Ok(UseStore {
        id: id.into(),
        definition: Arc::new(definition),
    })
}

/// Declare an options store that carries its own id.
pub fn define_options_store(options: OptionsStore) -> Result<UseStore> {
    let id = options
        .id()
        .filter(|id| !id.is_empty())
        .ok_or(StoreError::MissingId)?
        .to_string();
    define_store(id, options)
}

impl UseStore {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The store from the ambient registry, created on first access.
    ///
    /// Resolution order: the innermost [`Registry::provide`] on this thread,
    /// then the process-wide active registry.
    pub fn use_store(&self) -> Result<Store> {
        let registry = active_registry().ok_or(StoreError::NoActiveRegistry)?;
        self.use_store_in(&registry)
    }

    /// The store from an explicit registry, created on first access.
    pub fn use_store_in(&self, registry: &Registry) -> Result<Store> {
        registry.get_or_create_store(&self.id, &self.definition)
    }
}

impl fmt::Debug for UseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseStore")
            .field("id", &self.id)
            .field("definition", &self.definition)
            .finish()
    }
}

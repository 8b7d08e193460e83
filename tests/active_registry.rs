//! The process-wide active registry, kept in its own test binary so no other
//! test races on it.

use pantry::{
    active_registry, clear_active_registry, define_store, OptionsStore, Registry, StoreError,
};
use serde_json::json;

struct App {
    name: &'static str,
}

#[test]
fn use_store_falls_back_to_the_installed_registry() {
    let use_counter =
        define_store("counter", OptionsStore::new().state(|| json!({ "count": 0 }))).unwrap();

    clear_active_registry();
    assert!(matches!(
        use_counter.use_store(),
        Err(StoreError::NoActiveRegistry)
    ));

    let registry = Registry::new();
    registry.install(App { name: "demo" });
    assert!(active_registry().is_some_and(|active| active.ptr_eq(&registry)));

    let counter = use_counter.use_store().unwrap();
    assert!(registry.store("counter").is_some_and(|s| s.ptr_eq(&counter)));

    let app = registry.app().unwrap();
    assert_eq!(app.downcast_ref::<App>().map(|app| app.name), Some("demo"));

    // A provided registry shadows the installed one on this thread.
    let scoped = Registry::new();
    let local = scoped.provide(|| use_counter.use_store()).unwrap();
    assert!(!local.ptr_eq(&counter));
    assert!(use_counter.use_store().unwrap().ptr_eq(&counter));

    // Using a store never switches the active registry.
    let other = Registry::new();
    use_counter.use_store_in(&other).unwrap();
    assert!(active_registry().is_some_and(|active| active.ptr_eq(&registry)));

    clear_active_registry();
    assert!(active_registry().is_none());
}

//! Counter application: an options store, a setup store and three plugins
//! (persistence, action logging, extra members).
//!
//! Run with `RUST_LOG=pantry=debug` to see the store lifecycle.

use pantry::{
    define_store, ActionFn, OptionsStore, Registry, StoreDefinition, StoreSetup, SubscribeOptions,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt, EnvFilter};

/// Stand-in for browser local storage.
type Storage = Arc<Mutex<HashMap<String, String>>>;

fn storage_key(id: &str) -> String {
    format!("pantry:{id}:state")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    println!("=== Counter App ===\n");

    let storage: Storage = Arc::new(Mutex::new(HashMap::new()));
    let registry = Registry::new();
    registry.install("counter-app");

    // Persist state: restore it if saved, otherwise save it on every change.
    {
        let storage = storage.clone();
        registry.use_plugin(move |ctx| {
            let key = storage_key(ctx.store.id());
            let saved = storage.lock().ok()?.get(&key).cloned();
            match saved.and_then(|raw| serde_json::from_str::<Value>(&raw).ok()) {
                Some(state) => {
                    println!("   [persist] restoring {key}");
                    ctx.store.set_state(state).ok()?;
                }
                None => {
                    let storage = storage.clone();
                    ctx.store.subscribe(
                        move |info, state| {
                            if let Ok(mut storage) = storage.lock() {
                                storage.insert(storage_key(&info.store_id), state.to_string());
                            }
                        },
                        SubscribeOptions::default(),
                    );
                }
            }
            None
        });
    }

    // Log every action with its result.
    registry.use_plugin(|ctx| {
        ctx.store.on_action(|action| {
            println!(
                "   [log] {}.{}({:?})",
                action.store().id(),
                action.name(),
                action.args()
            );
            let name = action.name().to_string();
            action.after(move |value| println!("   [log] {name} returned {value}"));
            let name = action.name().to_string();
            action.on_error(move |failure| println!("   [log] {name} failed: {failure}"));
        });
        None
    });

    // Extra plain members on every store.
    registry.use_plugin(|_| json!({ "a": 1 }).as_object().cloned());

    let use_counter = define_store(
        "counter",
        OptionsStore::new()
            .state(|| json!({ "count": 0, "fruits": ["banana", "apple"] }))
            .getter("double_count", |store| {
                json!(store.get_as::<i64>("count").unwrap_or(0) * 2)
            })
            .action(
                "increment",
                ActionFn::sync(|store, _args| {
                    let count = store.get_as::<i64>("count")?;
                    store.set("count", json!(count + 1))?;
                    store.patch_with(|state| {
                        if let Some(Value::Array(fruits)) = state.get_mut("fruits") {
                            fruits.push(json!("chestnut"));
                        }
                    });
                    Ok(json!(123))
                }),
            ),
    )?;

    let use_greeting = define_store(
        "greeting",
        StoreDefinition::setup(|cx| {
            let name = cx.field(json!("world"));
            let message = cx.computed({
                let name = name.clone();
                move || json!(format!("hello, {}", name.get().as_str().unwrap_or("?")))
            });
            let rename = ActionFn::sync({
                let name = name.clone();
                move |_, args| {
                    let next = args.first().cloned().unwrap_or(Value::Null);
                    name.set(next.clone());
                    Ok(next)
                }
            });
            StoreSetup::new()
                .field("name", name)
                .getter("message", message)
                .action("rename", rename)
        }),
    )?;

    println!("1. First use creates the counter");
    let counter = use_counter.use_store()?;
    println!("   count = {}", counter.get("count").unwrap_or_default());
    println!("   plugin member a = {}\n", counter.get("a").unwrap_or_default());

    println!("2. Calling increment twice");
    counter.call("increment", vec![])?;
    counter.call("increment", vec![])?;
    println!("   double_count = {}\n", counter.get("double_count").unwrap_or_default());

    println!("3. Patching the state");
    counter.patch(json!({ "count": 10 }))?;
    println!("   state = {}\n", counter.state());

    println!("4. Setup store");
    let greeting = use_greeting.use_store()?;
    println!("   message = {}", greeting.get("message").unwrap_or_default());
    greeting.call("rename", vec![json!("pantry")])?;
    println!("   message = {}\n", greeting.get("message").unwrap_or_default());

    println!("5. Disposing and recreating the counter");
    counter.dispose();
    let counter = use_counter.use_store()?;
    println!("   count = {} (state kept by the registry)\n", counter.get("count").unwrap_or_default());

    println!("6. A fresh registry restores from storage");
    let restored = Registry::new();
    {
        let storage = storage.clone();
        restored.use_plugin(move |ctx| {
            let saved = storage.lock().ok()?.get(&storage_key(ctx.store.id())).cloned()?;
            ctx.store.set_state(serde_json::from_str(&saved).ok()?).ok()?;
            None
        });
    }
    let counter = use_counter.use_store_in(&restored)?;
    println!("   count = {}", counter.get("count").unwrap_or_default());
    println!("   whole tree = {}", restored.state());

    println!("\n✓ Example complete!");
    Ok(())
}

use super::subscriptions::{SubscriberList, Subscription};
use super::Store;
use crate::error::{ActionFailure, Result, StoreError};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`Store::dispatch`] and by async action bodies.
pub type ActionFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What an action body returns.
pub type ActionResult = std::result::Result<Value, ActionFailure>;

type SyncBody = Arc<dyn Fn(&Store, &[Value]) -> ActionResult + Send + Sync>;
type AsyncBody = Arc<dyn Fn(Store, Vec<Value>) -> ActionFuture<ActionResult> + Send + Sync>;

/// A user-declared action body.
///
/// Whether an action completes synchronously is part of its declaration:
/// build it with [`ActionFn::sync`] or [`ActionFn::from_async`].
#[derive(Clone)]
pub enum ActionFn {
    Sync(SyncBody),
    Async(AsyncBody),
}

impl ActionFn {
    /// An action that completes before returning.
    pub fn sync<F>(body: F) -> Self
    where
        F: Fn(&Store, &[Value]) -> ActionResult + Send + Sync + 'static,
    {
        ActionFn::Sync(Arc::new(body))
    }

    /// An action whose body is a future.
    pub fn from_async<F, Fut>(body: F) -> Self
    where
        F: Fn(Store, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        ActionFn::Async(Arc::new(move |store, args| Box::pin(body(store, args))))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, ActionFn::Async(_))
    }
}

impl fmt::Debug for ActionFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionFn::Sync(_) => f.write_str("ActionFn::Sync"),
            ActionFn::Async(_) => f.write_str("ActionFn::Async"),
        }
    }
}

/// What `on_action` subscribers receive, once per action call, before the body runs.
pub struct ActionContext {
    name: String,
    store: Store,
    args: Vec<Value>,
    after: SubscriberList<Value>,
    on_error: SubscriberList<ActionFailure>,
}

impl ActionContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Run `callback` with the action's return value once it succeeds.
    pub fn after<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.after.subscribe(callback)
    }

    /// Run `callback` with the failure if the action fails.
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ActionFailure) + Send + Sync + 'static,
    {
        self.on_error.subscribe(callback)
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("name", &self.name)
            .field("store", &self.store.id())
            .field("args", &self.args)
            .finish()
    }
}

struct CallHooks {
    after: SubscriberList<Value>,
    on_error: SubscriberList<ActionFailure>,
}

/// An action as exposed on a store: the body plus before/after/error publishing.
#[derive(Clone)]
pub(crate) struct WrappedAction {
    name: String,
    body: ActionFn,
}

impl WrappedAction {
    pub(crate) fn new(name: impl Into<String>, body: ActionFn) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    pub(crate) fn is_async(&self) -> bool {
        self.body.is_async()
    }

    fn announce(&self, store: &Store, args: &[Value]) -> CallHooks {
        let hooks = CallHooks {
            after: SubscriberList::new(),
            on_error: SubscriberList::new(),
        };
        let context = ActionContext {
            name: self.name.clone(),
            store: store.clone(),
            args: args.to_vec(),
            after: hooks.after.clone(),
            on_error: hooks.on_error.clone(),
        };
        tracing::trace!(store = store.id(), action = %self.name, "action called");
        store.action_subscribers().publish(&context);
        hooks
    }

    fn failed(&self, store: &Store, failure: ActionFailure) -> StoreError {
        StoreError::ActionFailed {
            store: store.id().to_string(),
            action: self.name.clone(),
            source: failure,
        }
    }

    /// Run a sync action to completion.
    pub(crate) fn call(&self, store: &Store, args: Vec<Value>) -> Result<Value> {
        let body = match &self.body {
            ActionFn::Sync(body) => Arc::clone(body),
            ActionFn::Async(_) => {
                return Err(StoreError::AsyncAction {
                    store: store.id().to_string(),
                    action: self.name.clone(),
                })
            }
        };

        let hooks = self.announce(store, &args);
        match body(store, &args) {
            Ok(value) => {
                hooks.after.publish(&value);
                Ok(value)
            }
            Err(failure) => {
                hooks.on_error.publish(&failure);
                Err(self.failed(store, failure))
            }
        }
    }

    /// Run any action, sync or async, behind one future.
    ///
    /// Subscribers are notified before this returns. A sync body has already
    /// finished by then; an async body runs when the future is polled, and its
    /// after/error callbacks run when it resolves. Dropping the future unpolled
    /// means neither kind of callback fires for that call.
    pub(crate) fn dispatch(&self, store: &Store, args: Vec<Value>) -> ActionFuture<Result<Value>> {
        let body = match &self.body {
            ActionFn::Sync(_) => {
                let result = self.call(store, args);
                return Box::pin(std::future::ready(result));
            }
            ActionFn::Async(body) => Arc::clone(body),
        };

        let hooks = self.announce(store, &args);
        let pending = body(store.clone(), args);
        let store = store.clone();
        let action = self.clone();

        Box::pin(async move {
            let outcome = pending.await;
            let live = !store.is_disposed();
            if !live {
                tracing::debug!(
                    store = store.id(),
                    action = %action.name,
                    "store disposed before action settled; skipping hooks"
                );
            }
            match outcome {
                Ok(value) => {
                    if live {
                        hooks.after.publish(&value);
                    }
                    Ok(value)
                }
                Err(failure) => {
                    if live {
                        hooks.on_error.publish(&failure);
                    }
                    Err(action.failed(&store, failure))
                }
            }
        })
    }
}

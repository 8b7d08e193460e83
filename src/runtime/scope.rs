use super::ReactiveRuntime;
use std::cell::RefCell;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

thread_local! {
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeState {
    active: bool,
    observers: Vec<usize>,
    children: Vec<EffectScope>,
}

struct ScopeInner {
    runtime: Arc<ReactiveRuntime>,
    parent: Option<Weak<ScopeInner>>,
    state: Mutex<ScopeState>,
}

/// A disposable group of reactive subscriptions.
///
/// Watchers and memos created while the scope is running (see [`EffectScope::run`])
/// are owned by it. [`EffectScope::stop`] disposes all of them and stops every
/// child scope.
///
/// # Examples
///
/// ```
/// use pantry::runtime::EffectScope;
/// use pantry::Signal;
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let scope = EffectScope::new();
/// let count = Signal::new(0);
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// scope.run(|| {
///     let hits = hits.clone();
///     count.watch(move |_| {
///         hits.fetch_add(1, Ordering::SeqCst);
///     });
/// });
///
/// count.set(1);
/// scope.stop();
/// count.set(2);
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct EffectScope {
    inner: Arc<ScopeInner>,
}

impl EffectScope {
    /// Create a detached scope on the current runtime.
    pub fn new() -> Self {
        Self::with_runtime(ReactiveRuntime::current())
    }

    /// Create a detached scope on an explicit runtime.
    pub fn with_runtime(runtime: Arc<ReactiveRuntime>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                runtime,
                parent: None,
                state: Mutex::new(ScopeState {
                    active: true,
                    observers: Vec::new(),
                    children: Vec::new(),
                }),
            }),
        }
    }

    /// Create a child scope that is stopped together with this one.
    ///
    /// A child of a stopped scope starts out stopped.
    pub fn child(&self) -> Self {
        let child = Self {
            inner: Arc::new(ScopeInner {
                runtime: Arc::clone(&self.inner.runtime),
                parent: Some(Arc::downgrade(&self.inner)),
                state: Mutex::new(ScopeState {
                    active: true,
                    observers: Vec::new(),
                    children: Vec::new(),
                }),
            }),
        };

        let mut state = self.lock();
        if state.active {
            state.children.push(child.clone());
        } else {
            child.lock().active = false;
        }
        drop(state);
        child
    }

    /// The scope currently running on this thread, if any.
    pub fn current() -> Option<Self> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// The runtime this scope's primitives belong to.
    pub fn runtime(&self) -> Arc<ReactiveRuntime> {
        Arc::clone(&self.inner.runtime)
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the scope has not been stopped yet.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Run `f` with this scope (and its runtime) current.
    ///
    /// Returns `None` without calling `f` when the scope has been stopped.
    pub fn run<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R,
    {
        if !self.is_active() {
            tracing::warn!("cannot run an inactive effect scope");
            return None;
        }

        SCOPE_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ReactiveRuntime::with_runtime(self.runtime(), f)
        }));
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => Some(r),
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Hand ownership of `observer_id` to the scope running on this thread.
    ///
    /// Outside any scope the observer lives until it is stopped explicitly.
    pub(crate) fn track_observer(observer_id: usize) {
        if let Some(scope) = Self::current() {
            let mut state = scope.lock();
            if state.active {
                state.observers.push(observer_id);
                return;
            }
            drop(state);
            scope.inner.runtime.dispose_observer(observer_id);
        }
    }

    /// Stop the scope: dispose its observers and stop its children.
    ///
    /// Stopping twice is a no-op.
    pub fn stop(&self) {
        let (observers, children) = {
            let mut state = self.lock();
            if !state.active {
                return;
            }
            state.active = false;
            (
                std::mem::take(&mut state.observers),
                std::mem::take(&mut state.children),
            )
        };

        for child in children {
            child.stop();
        }
        for observer_id in observers {
            self.inner.runtime.dispose_observer(observer_id);
        }

        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            let mut state = parent.state.lock().unwrap_or_else(PoisonError::into_inner);
            state
                .children
                .retain(|child| !Arc::ptr_eq(&child.inner, &self.inner));
        }
    }

    /// Number of observers currently owned by the scope.
    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Number of child scopes that are still running.
    pub fn child_count(&self) -> usize {
        self.lock().children.len()
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Memo, Signal};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn stopping_parent_stops_children() {
        let parent = EffectScope::new();
        let child = parent.child();
        let signal = Signal::new(1);
        let hits = Arc::new(AtomicUsize::new(0));

        child.run(|| {
            let hits = hits.clone();
            signal.watch(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        });

        signal.set(2);
        parent.stop();
        signal.set(3);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!child.is_active());
        assert!(child.run(|| ()).is_none());
    }

    #[test]
    fn stopped_child_leaves_parent_running() {
        let parent = EffectScope::new();
        let child = parent.child();
        child.stop();

        assert!(parent.is_active());
        assert_eq!(parent.run(|| 7), Some(7));
    }

    #[test]
    fn scope_owns_memos() {
        let scope = EffectScope::new();
        let count = Signal::new(2);
        let doubled = scope
            .run(|| {
                let count = count.clone();
                Memo::new(move || count.get() * 2)
            })
            .unwrap();

        assert_eq!(doubled.get(), 4);
        assert_eq!(scope.observer_count(), 1);

        scope.stop();
        count.set(5);
        // A stopped memo still answers, it just stops caching.
        assert_eq!(doubled.get(), 10);
    }
}

use crate::runtime::{EffectScope, ReactiveRuntime};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// A reactive cell that holds a value and notifies dependents when changed.
///
/// Clones share the same cell.
pub struct Signal<T> {
    value: Arc<RwLock<T>>,
    id: usize,
    runtime: Arc<ReactiveRuntime>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            id: self.id,
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Create a new signal on the current runtime.
    pub fn new(initial: T) -> Self {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();

        Self {
            value: Arc::new(RwLock::new(initial)),
            id,
            runtime,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, T> {
        self.value.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.value.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        self.runtime.track_read(self.id);
        self.read().clone()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.read().clone()
    }

    /// Set a new value and notify dependents.
    pub fn set(&self, new_value: T) {
        *self.write() = new_value;
        self.runtime.notify_observers(self.id);
    }

    /// Update the value in place and notify dependents.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.write();
        f(&mut *value);
        drop(value); // Release the write lock before notifying
        self.runtime.notify_observers(self.id);
    }

    /// Read the value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.runtime.track_read(self.id);
        let value = self.read();
        f(&*value)
    }

    /// Read the value with a function without registering a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.read();
        f(&*value)
    }

    /// Notify dependents without changing the value.
    pub fn notify(&self) {
        self.runtime.notify_observers(self.id);
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// Watch this signal for changes.
    ///
    /// The callback is not called on registration; it runs with the new value
    /// after every subsequent write. When created inside a running
    /// [`EffectScope`] the watcher is stopped together with that scope.
    pub fn watch<F>(&self, callback: F) -> WatchHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let observer_id = self.runtime.next_id();
        let value = Arc::clone(&self.value);

        self.runtime.create_observer(observer_id, move || {
            let current = value.read().unwrap_or_else(PoisonError::into_inner).clone();
            callback(&current);
        });

        // Subscribe to this signal
        self.runtime
            .with_observer(observer_id, || self.runtime.track_read(self.id));
        EffectScope::track_observer(observer_id);

        WatchHandle {
            observer_id,
            runtime: Arc::downgrade(&self.runtime),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Signal<T> {
    /// Set a new value, notifying dependents only when it differs.
    ///
    /// Returns whether the value changed.
    pub fn set_if_changed(&self, new_value: T) -> bool {
        let mut value = self.write();
        if *value == new_value {
            return false;
        }
        *value = new_value;
        drop(value);
        self.runtime.notify_observers(self.id);
        true
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.value.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &*value)
            .finish()
    }
}

/// Handle to a running watcher.
///
/// Dropping the handle does not stop the watcher; its owning scope (or an
/// explicit [`WatchHandle::stop`]) does.
#[derive(Clone)]
pub struct WatchHandle {
    observer_id: usize,
    runtime: Weak<ReactiveRuntime>,
}

impl WatchHandle {
    /// Stop the watcher. Idempotent.
    pub fn stop(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.dispose_observer(self.observer_id);
        }
    }

    /// Whether the watcher still fires.
    pub fn is_active(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|runtime| runtime.is_live(self.observer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn signal_get_set_update() {
        let signal = Signal::new(1);
        assert_eq!(signal.get(), 1);

        signal.set(2);
        assert_eq!(signal.get(), 2);

        signal.update(|n| *n += 10);
        assert_eq!(signal.with(|n| *n), 12);
    }

    #[test]
    fn watch_is_lazy_and_sees_new_value() {
        let signal = Signal::new(String::from("a"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let handle = signal.watch(move |value| {
            seen_clone.lock().unwrap().push(value.clone());
        });
        assert!(seen.lock().unwrap().is_empty());

        signal.set("b".to_string());
        signal.update(|s| s.push('c'));
        assert_eq!(*seen.lock().unwrap(), vec!["b".to_string(), "bc".to_string()]);

        handle.stop();
        handle.stop();
        assert!(!handle.is_active());
        signal.set("d".to_string());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn set_if_changed_skips_equal_values() {
        let signal = Signal::new(5);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        signal.watch(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!signal.set_if_changed(5));
        assert!(signal.set_if_changed(6));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

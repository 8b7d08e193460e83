use crate::runtime::{EffectScope, ReactiveRuntime};
use std::sync::{Arc, PoisonError, RwLock};

/// A memoized computed value that automatically tracks dependencies.
///
/// Memos compute lazily on first read and only recompute after one of the
/// signals (or memos) they read has changed. Clones share one cache; the memo
/// leaves the runtime when its scope stops or the last clone is dropped.
pub struct Memo<T> {
    inner: Arc<MemoInner<T>>,
}

struct MemoInner<T> {
    compute: Box<dyn Fn() -> T + Send + Sync>,
    cached: RwLock<Option<T>>,
    id: usize,
    runtime: Arc<ReactiveRuntime>,
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        self.runtime.dispose_observer(self.id);
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Memo<T> {
    /// Create a new memo with the given computation function.
    ///
    /// Inside a running [`EffectScope`] the memo is owned by that scope.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();

        // Register this as a memo with the runtime
        runtime.register_memo(id);
        EffectScope::track_observer(id);

        Self {
            inner: Arc::new(MemoInner {
                compute: Box::new(compute),
                cached: RwLock::new(None),
                id,
                runtime,
            }),
        }
    }

    fn refresh(&self) -> T {
        let inner = &*self.inner;
        inner.runtime.begin_memo_run(inner.id);
        let value = inner.runtime.with_observer(inner.id, || (inner.compute)());
        *inner.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        inner.runtime.mark_memo_clean(inner.id);
        value
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// A disposed memo computes on every read, and whoever reads it tracks
    /// the sources directly.
    pub fn get(&self) -> T {
        let inner = &*self.inner;
        if !inner.runtime.is_live(inner.id) {
            return (inner.compute)();
        }
        inner.runtime.track_read(inner.id);

        if inner.runtime.is_memo_dirty(inner.id) {
            return self.refresh();
        }

        let cached = inner.cached.read().unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            Some(value) => value.clone(),
            None => {
                drop(cached);
                self.refresh()
            }
        }
    }

    /// Read the memoized value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.get();
        f(&value)
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> usize {
        self.inner.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Signal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn memo_basic() {
        let count = Signal::new(5);
        let doubled = Memo::new({
            let count = count.clone();
            move || count.get() * 2
        });

        assert_eq!(doubled.get(), 10);

        count.set(10);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn memo_caches_between_changes() {
        let runs = Arc::new(AtomicUsize::new(0));
        let count = Signal::new(1);
        let squared = Memo::new({
            let count = count.clone();
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                count.get() * count.get()
            }
        });

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(squared.get(), 1);
        assert_eq!(squared.get(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(3);
        assert_eq!(squared.get(), 9);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn memo_chain_propagates() {
        let input = Signal::new(1);
        let doubled = Memo::new({
            let input = input.clone();
            move || input.get() * 2
        });
        let quadrupled = Memo::new({
            let doubled = doubled.clone();
            move || doubled.get() * 2
        });

        assert_eq!(quadrupled.get(), 4);

        input.set(5);
        assert_eq!(quadrupled.get(), 20);
    }

    #[test]
    fn dropping_the_last_clone_leaves_the_graph() {
        ReactiveRuntime::scope(|| {
            let runtime = ReactiveRuntime::current();
            let count = Signal::new(1);
            let baseline = runtime.graph_size();

            let doubled = Memo::new({
                let count = count.clone();
                move || count.get() * 2
            });
            let copy = doubled.clone();
            assert_eq!(copy.get(), 2);
            assert!(runtime.graph_size() > baseline);

            drop(doubled);
            count.set(4);
            assert_eq!(copy.get(), 8);

            drop(copy);
            assert_eq!(runtime.graph_size(), baseline);
        });
    }
}

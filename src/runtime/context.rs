use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObserverFn = Arc<dyn Fn() + Send + Sync>;

/// Dependency graph shared by every primitive created in one runtime.
struct ReactiveContext {
    // Map from source ID (signal or memo) to the observers that read it
    dependencies: HashMap<usize, HashSet<usize>>,
    // Map from observer ID to the sources it read
    observer_deps: HashMap<usize, HashSet<usize>>,
    // Watcher callbacks, keyed by observer ID
    observers: HashMap<usize, ObserverFn>,
    // Memo ID -> dirty flag, for live memos only
    memo_dirty: HashMap<usize, bool>,
}

impl ReactiveContext {
    fn new() -> Self {
        Self {
            dependencies: HashMap::new(),
            observer_deps: HashMap::new(),
            observers: HashMap::new(),
            memo_dirty: HashMap::new(),
        }
    }

    fn is_live(&self, observer_id: usize) -> bool {
        self.observers.contains_key(&observer_id) || self.memo_dirty.contains_key(&observer_id)
    }

    fn unlink(&mut self, observer_id: usize) {
        if let Some(old_deps) = self.observer_deps.remove(&observer_id) {
            for source_id in old_deps {
                if let Some(deps) = self.dependencies.get_mut(&source_id) {
                    deps.remove(&observer_id);
                    if deps.is_empty() {
                        self.dependencies.remove(&source_id);
                    }
                }
            }
        }
    }
}

/// Reactive runtime tracking dependencies between signals, memos and watchers.
///
/// Supports both a global runtime (default) and scoped runtimes for isolation.
/// Primitives capture the runtime that was current when they were created, so
/// a registry built inside [`ReactiveRuntime::scope`] keeps using that runtime
/// even when its stores are touched later from outside the closure.
///
/// # Examples
///
/// ```
/// use pantry::runtime::ReactiveRuntime;
/// use pantry::Signal;
///
/// ReactiveRuntime::scope(|| {
///     let signal = Signal::new(0);
///     assert_eq!(signal.get(), 0);
/// });
/// ```
pub struct ReactiveRuntime {
    next_id: AtomicUsize,
    context: Mutex<ReactiveContext>,
}

// Thread-local stack for scoped runtimes, and the observer currently
// collecting reads on this thread (tagged with its runtime's address)
thread_local! {
    static RUNTIME_STACK: RefCell<Vec<Arc<ReactiveRuntime>>> = const { RefCell::new(Vec::new()) };
    static CURRENT_OBSERVER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

impl ReactiveRuntime {
    fn new() -> Arc<Self> {
        Arc::new(ReactiveRuntime {
            next_id: AtomicUsize::new(0),
            context: Mutex::new(ReactiveContext::new()),
        })
    }

    /// Run a function with a fresh isolated runtime.
    ///
    /// Every primitive created inside `f` belongs to the new runtime.
    pub fn scope<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        Self::with_runtime(Self::new(), f)
    }

    /// The process-wide runtime used when no scoped runtime is active.
    pub fn global() -> Arc<Self> {
        use std::sync::OnceLock;
        static RUNTIME: OnceLock<Arc<ReactiveRuntime>> = OnceLock::new();
        Arc::clone(RUNTIME.get_or_init(Self::new))
    }

    /// The runtime on top of the thread-local stack, or the global one.
    pub fn current() -> Arc<Self> {
        RUNTIME_STACK.with(|stack| stack.borrow().last().cloned().unwrap_or_else(Self::global))
    }

    /// Run `f` with `runtime` as the current runtime.
    pub fn with_runtime<F, R>(runtime: Arc<Self>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().push(runtime);
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    fn swap_observer(observer: Option<(usize, usize)>) -> Option<(usize, usize)> {
        CURRENT_OBSERVER.with(|current| current.replace(observer))
    }

    fn lock(&self) -> MutexGuard<'_, ReactiveContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate the next unique ID for a reactive primitive.
    pub fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Track a read of `source_id` by the current observer.
    pub fn track_read(&self, source_id: usize) {
        let current_observer = match CURRENT_OBSERVER.with(Cell::get) {
            Some((runtime, observer)) if runtime == self.addr() => observer,
            _ => return,
        };
        let mut ctx = self.lock();
        if !ctx.is_live(current_observer) {
            return;
        }
        ctx.dependencies
            .entry(source_id)
            .or_default()
            .insert(current_observer);
        ctx.observer_deps
            .entry(current_observer)
            .or_default()
            .insert(source_id);
    }

    /// Notify everything that depends on `source_id`.
    ///
    /// Memos are marked dirty (transitively); watcher callbacks run once each,
    /// in creation order, after the graph lock is released.
    pub fn notify_observers(&self, source_id: usize) {
        let callbacks = {
            let mut ctx = self.lock();
            let mut queue: VecDeque<usize> = ctx
                .dependencies
                .get(&source_id)
                .map(|obs| obs.iter().copied().collect())
                .unwrap_or_default();
            let mut seen = HashSet::new();
            let mut to_run = Vec::new();

            while let Some(observer_id) = queue.pop_front() {
                if !seen.insert(observer_id) {
                    continue;
                }
                if let Some(dirty) = ctx.memo_dirty.get_mut(&observer_id) {
                    if *dirty {
                        continue;
                    }
                    *dirty = true;
                    if let Some(dependents) = ctx.dependencies.get(&observer_id) {
                        queue.extend(dependents.iter().copied());
                    }
                } else if let Some(callback) = ctx.observers.get(&observer_id) {
                    to_run.push((observer_id, Arc::clone(callback)));
                }
            }

            to_run.sort_by_key(|(id, _)| *id);
            to_run
        };

        for (observer_id, callback) in callbacks {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.untracked(|| callback())
            }));
            if outcome.is_err() {
                tracing::error!(observer = observer_id, "watcher callback panicked");
            }
        }
    }

    /// Register a watcher callback under `observer_id`, dropping stale edges.
    pub fn create_observer<F>(&self, observer_id: usize, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut ctx = self.lock();
        ctx.unlink(observer_id);
        ctx.observers.insert(observer_id, Arc::new(f));
    }

    /// Run a function with `observer_id` as the current observer.
    pub fn with_observer<F, R>(&self, observer_id: usize, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let prev = Self::swap_observer(Some((self.addr(), observer_id)));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        Self::swap_observer(prev);

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Run a function with no current observer, so reads are not tracked.
    pub fn untracked<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let prev = Self::swap_observer(None);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        Self::swap_observer(prev);

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Register a memo and mark it dirty.
    pub fn register_memo(&self, memo_id: usize) {
        self.lock().memo_dirty.insert(memo_id, true);
    }

    /// Whether a memo needs recomputation. Disposed memos always do.
    pub fn is_memo_dirty(&self, memo_id: usize) -> bool {
        self.lock().memo_dirty.get(&memo_id).copied().unwrap_or(true)
    }

    /// Forget a memo's previous sources before it recomputes.
    pub fn begin_memo_run(&self, memo_id: usize) {
        self.lock().unlink(memo_id);
    }

    /// Mark a memo as clean (after recomputation).
    pub fn mark_memo_clean(&self, memo_id: usize) {
        if let Some(dirty) = self.lock().memo_dirty.get_mut(&memo_id) {
            *dirty = false;
        }
    }

    /// Stop an observer for good: it is unlinked and never tracked or run again.
    ///
    /// Nothing about the id is kept afterwards.
    pub fn dispose_observer(&self, observer_id: usize) {
        let callback = {
            let mut ctx = self.lock();
            ctx.unlink(observer_id);
            ctx.dependencies.remove(&observer_id);
            ctx.memo_dirty.remove(&observer_id);
            ctx.observers.remove(&observer_id)
        };
        // Captured primitives may dispose themselves on drop.
        drop(callback);
    }

    /// Whether `observer_id` is a watcher or memo that has not been disposed.
    pub fn is_live(&self, observer_id: usize) -> bool {
        self.lock().is_live(observer_id)
    }

    /// Number of entries held by the dependency graph.
    pub(crate) fn graph_size(&self) -> usize {
        let ctx = self.lock();
        ctx.dependencies.len() + ctx.observer_deps.len() + ctx.observers.len() + ctx.memo_dirty.len()
    }

    /// Number of live observers depending on `source_id`.
    pub fn dependent_count(&self, source_id: usize) -> usize {
        self.lock()
            .dependencies
            .get(&source_id)
            .map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn scoped_runtime_is_current_inside_closure() {
        let outer = ReactiveRuntime::current();
        ReactiveRuntime::scope(|| {
            let inner = ReactiveRuntime::current();
            assert!(!Arc::ptr_eq(&outer, &inner));
        });
        assert!(Arc::ptr_eq(&outer, &ReactiveRuntime::current()));
    }

    #[test]
    fn disposed_observer_is_not_run() {
        let runtime = ReactiveRuntime::new();
        let source = runtime.next_id();
        let observer = runtime.next_id();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        runtime.create_observer(observer, move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        runtime.with_observer(observer, || runtime.track_read(source));

        runtime.notify_observers(source);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        runtime.dispose_observer(observer);
        runtime.notify_observers(source);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.dependent_count(source), 0);
    }

    #[test]
    fn graph_stays_bounded_across_dispose_cycles() {
        let runtime = ReactiveRuntime::new();
        let source = runtime.next_id();

        let cycle = || {
            let watcher = runtime.next_id();
            let memo = runtime.next_id();
            runtime.create_observer(watcher, || {});
            runtime.with_observer(watcher, || runtime.track_read(source));
            runtime.register_memo(memo);
            runtime.with_observer(memo, || runtime.track_read(source));
            runtime.notify_observers(source);
            runtime.dispose_observer(watcher);
            runtime.dispose_observer(memo);
        };

        cycle();
        assert_eq!(runtime.graph_size(), 0);
        for _ in 0..100 {
            cycle();
        }
        assert_eq!(runtime.graph_size(), 0);
        assert!(!runtime.is_live(runtime.next_id()));
    }

    #[test]
    fn disposed_observer_does_not_track_new_reads() {
        let runtime = ReactiveRuntime::new();
        let source = runtime.next_id();
        let memo = runtime.next_id();
        runtime.register_memo(memo);
        runtime.dispose_observer(memo);

        runtime.with_observer(memo, || runtime.track_read(source));
        assert_eq!(runtime.dependent_count(source), 0);
        assert!(runtime.is_memo_dirty(memo));
    }

    #[test]
    fn panicking_watcher_does_not_block_others() {
        let runtime = ReactiveRuntime::new();
        let source = runtime.next_id();
        let first = runtime.next_id();
        let second = runtime.next_id();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        runtime.create_observer(first, || panic!("boom"));
        runtime.create_observer(second, move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        runtime.with_observer(first, || runtime.track_read(source));
        runtime.with_observer(second, || runtime.track_read(source));

        runtime.notify_observers(source);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

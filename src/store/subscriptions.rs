use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct Entries<A> {
    next_token: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<A>)>>,
}

/// An ordered list of callbacks sharing one argument type.
///
/// Clones share the same list.
pub struct SubscriberList<A> {
    entries: Arc<Entries<A>>,
}

impl<A> Clone for SubscriberList<A> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<A: 'static> SubscriberList<A> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Entries {
                next_token: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Callback<A>)>> {
        self.entries
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a callback. The returned [`Subscription`] removes exactly this one.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let token = self.entries.next_token.fetch_add(1, Ordering::Relaxed);
        self.lock().push((token, Arc::new(callback)));

        let entries = Arc::downgrade(&self.entries);
        Subscription::new(move || {
            if let Some(entries) = entries.upgrade() {
                let mut callbacks = entries
                    .callbacks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(idx) = callbacks.iter().position(|(t, _)| *t == token) {
                    callbacks.remove(idx);
                }
            }
        })
    }

    /// Call every current callback in insertion order.
    ///
    /// A panicking callback is logged and skipped; the rest still run.
    pub fn publish(&self, args: &A) {
        let snapshot: Vec<Callback<A>> = self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();

        for (position, callback) in snapshot.into_iter().enumerate() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(args)));
            if outcome.is_err() {
                tracing::error!(position, "subscriber panicked; continuing with the rest");
            }
        }
    }

    /// Remove every callback.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<A: 'static> Default for SubscriberList<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer returned by every subscribe-style call.
///
/// Dropping it keeps the subscription alive; call [`Subscription::unsubscribe`]
/// to remove it. Unsubscribing twice is a no-op.
#[derive(Clone)]
pub struct Subscription {
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new<F>(cancel: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            cancel: Arc::new(cancel),
        }
    }

    /// A subscription that was never attached to anything.
    pub(crate) fn inert() -> Self {
        Self::new(|| {})
    }

    pub fn unsubscribe(&self) {
        (self.cancel)();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

//! Access token listeners.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use authkeep_core::AccessToken;

/// Receives tokens obtained by a refresh or a completed device flow.
///
/// Called synchronously on the task that performed the refresh, after the
/// token was persisted. Implementations should return quickly.
pub trait AccessTokenListener: Send + Sync {
    fn on_access_token(&self, token: &AccessToken);
}

impl<F> AccessTokenListener for F
where
    F: Fn(&AccessToken) + Send + Sync,
{
    fn on_access_token(&self, token: &AccessToken) {
        self(token)
    }
}

/// Registered listeners of one handle.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn AccessTokenListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Adding the same listener twice is a no-op.
    pub fn add(&self, listener: Arc<dyn AccessTokenListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Unregisters a listener. Returns `true` if it was registered.
    pub fn remove(&self, listener: &Arc<dyn AccessTokenListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener with `token`. A panicking listener is logged and
    /// skipped; the others still run.
    pub fn notify(&self, token: &AccessToken) {
        let snapshot: Vec<Arc<dyn AccessTokenListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_access_token(token))).is_err() {
                tracing::error!("Access token listener panicked");
            }
        }
    }
}

fn same_listener(a: &Arc<dyn AccessTokenListener>, b: &Arc<dyn AccessTokenListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PanickingListener;

    impl AccessTokenListener for PanickingListener {
        fn on_access_token(&self, _token: &AccessToken) {
            panic!("listener bug");
        }
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let set = ListenerSet::new();
        let seen = Arc::new(AtomicUsize::new(0));

        set.add(Arc::new(PanickingListener));
        let counter = seen.clone();
        set.add(Arc::new(move |token: &AccessToken| {
            assert_eq!(token.access_token, "AT");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let token = AccessToken::new("AT");
        set.notify(&token);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(token.access_token, "AT");
    }

    #[test]
    fn test_add_remove_by_identity() {
        let set = ListenerSet::new();
        let a: Arc<dyn AccessTokenListener> = Arc::new(|_: &AccessToken| {});
        let b: Arc<dyn AccessTokenListener> = Arc::new(|_: &AccessToken| {});

        set.add(a.clone());
        set.add(a.clone());
        set.add(b.clone());
        assert_eq!(set.len(), 2);

        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert_eq!(set.len(), 1);
    }
}

//! Cancellation token for cooperative cancellation.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
/// Tokens form a tree: cancelling a token cancels every child derived from it,
/// cancelling a child leaves the parent untouched.
#[derive(Default)]
pub struct CancellationToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation.
    callbacks: RwLock<Vec<CancelCallback>>,
    /// Tokens derived from this one.
    children: RwLock<Vec<Weak<CancellationToken>>>,
    /// Wakes tasks awaiting [`CancellationToken::cancelled`].
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new root token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a child token. The child is cancelled together with `parent`
    /// and inherits its reason.
    #[must_use]
    pub fn child(parent: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self::new());

        if let Some(reason) = parent.reason() {
            child.cancel(reason);
            return child;
        }

        let mut children = parent.children.write();
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child));
        drop(children);

        // The parent may have been cancelled while registering.
        if let Some(reason) = parent.reason() {
            child.cancel(reason);
        }

        child
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    /// Callbacks are invoked immediately. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let reason = reason.into();
        *self.reason.write() = Some(reason.clone());
        self.notify.notify_waiters();

        let callbacks = self.callbacks.read();
        for callback in callbacks.iter() {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback();
            })) {
                warn!("Cancellation callback panicked: {:?}", e);
            }
        }
        drop(callbacks);

        let children: Vec<_> = self.children.read().iter().filter_map(Weak::upgrade).collect();
        for child in children {
            child.cancel(reason.clone());
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.is_cancelled() {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback();
            })) {
                warn!("Cancellation callback panicked: {:?}", e);
            }
        } else {
            self.callbacks.write().push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("First reason");
        token.cancel("Second reason");

        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_on_cancel_before_and_after_cancellation() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let before = counter.clone();
        token.on_cancel(move || {
            before.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel("test");
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let after = counter.clone();
        token.on_cancel(move || {
            after.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let token = CancellationToken::new();
        token.on_cancel(|| panic!("Intentional panic"));

        token.cancel("test");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_parent_cancels_children_only_downwards() {
        let root = Arc::new(CancellationToken::new());
        let child = CancellationToken::child(&root);
        let grandchild = CancellationToken::child(&child);
        let sibling = CancellationToken::child(&root);

        sibling.cancel("sibling only");
        assert!(!root.is_cancelled());
        assert!(!child.is_cancelled());

        root.cancel("shutdown");
        assert_eq!(grandchild.reason(), Some("shutdown".to_string()));
        assert_eq!(sibling.reason(), Some("sibling only".to_string()));
    }

    #[test]
    fn test_child_of_cancelled_parent() {
        let root = Arc::new(CancellationToken::new());
        root.cancel("gone");
        let child = CancellationToken::child(&root);
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let root = Arc::new(CancellationToken::new());
        let child = CancellationToken::child(&root);

        let waiter = tokio::spawn({
            let child = child.clone();
            async move { child.cancelled().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        root.cancel("stop");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
